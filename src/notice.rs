//! User facing error notifications.
//!
//! Compilers report their failures here before handing the error back to the
//! scheduler, so a developer sees a broken stylesheet immediately even though
//! the watcher keeps running.

use std::fmt::{self, Display};

use console::style;

/// The fixed title a notification is shown under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Style,
    Script,
    Template,
}

impl Category {
    pub fn title(self) -> &'static str {
        match self {
            Category::Style => "SCSS",
            Category::Script => "Webpack",
            Category::Template => "PUG",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub category: Category,
    pub message: String,
}

impl Notice {
    pub fn new(category: Category, message: impl Display) -> Self {
        Self {
            category,
            message: message.to_string(),
        }
    }

    pub fn title(&self) -> &'static str {
        self.category.title()
    }
}

/// Sink for notices. Implementations must be cheap to call from any thread.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Prints notices as a highlighted block on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        tracing::warn!(title = notice.title(), "compilation failed");
        eprintln!(
            "{} {}\n{}",
            style("✖").red().bold(),
            style(notice.title()).red().bold(),
            notice.message
        );
    }
}
