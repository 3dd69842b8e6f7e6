//! Console output for canflash

use colored::Colorize;

/// Context for output rendering
pub struct OutputContext {
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print a result value; shown even in quiet mode
    pub fn value(&self, key: &str, value: &str) {
        if self.quiet {
            println!("{}", value);
        } else {
            println!("{}: {}", key.bold(), value);
        }
    }
}
