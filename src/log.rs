//! Colored terminal output macros
//!
//! All termcolor operations use `let _ =` to deliberately ignore errors.
//! Colored output is decorative and non-essential. If stderr/stdout is
//! unavailable (broken pipe, no TTY, etc.), the run continues without colors.

use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Enable or disable `debug!` output for the rest of the process.
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

#[must_use]
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Section header, printed in blue with a leading blank line
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        use ::termcolor::WriteColor as _;
        let bufwtr = ::termcolor::BufferWriter::stdout(::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = writeln!(&mut buffer);
        let _ = buffer.set_color(::termcolor::ColorSpec::new().set_fg(Some(::termcolor::Color::Blue)).set_bold(true));
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = buffer.reset();
        let _ = bufwtr.print(&buffer);
    }};
}

/// Plain informational line
#[macro_export]
macro_rules! detail {
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        let bufwtr = ::termcolor::BufferWriter::stdout(::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = bufwtr.print(&buffer);
    }};
}

/// Only printed when verbose output is enabled
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        if $crate::log::is_verbose() {
            use ::std::io::Write as _;
            use ::termcolor::WriteColor as _;
            let bufwtr = ::termcolor::BufferWriter::stdout(::termcolor::ColorChoice::Auto);
            let mut buffer = bufwtr.buffer();
            let _ = buffer.set_color(::termcolor::ColorSpec::new().set_dimmed(true));
            let _ = writeln!(&mut buffer, $($arg)*);
            let _ = buffer.reset();
            let _ = bufwtr.print(&buffer);
        }
    }};
}

/// Macro for printing warnings with yellow color
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        use ::termcolor::WriteColor as _;
        let bufwtr = ::termcolor::BufferWriter::stderr(::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = buffer.set_color(::termcolor::ColorSpec::new().set_fg(Some(::termcolor::Color::Yellow)));
        let _ = write!(&mut buffer, "⚠️  ");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = bufwtr.print(&buffer);
    }};
}

/// Macro for printing errors with red color
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        use ::termcolor::WriteColor as _;
        let bufwtr = ::termcolor::BufferWriter::stderr(::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = buffer.set_color(::termcolor::ColorSpec::new().set_fg(Some(::termcolor::Color::Red)));
        let _ = write!(&mut buffer, "❌ ");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = bufwtr.print(&buffer);
    }};
}

/// Macro for printing success messages with green color
#[macro_export]
macro_rules! success {
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        use ::termcolor::WriteColor as _;
        let bufwtr = ::termcolor::BufferWriter::stdout(::termcolor::ColorChoice::Auto);
        let mut buffer = bufwtr.buffer();
        let _ = buffer.set_color(::termcolor::ColorSpec::new().set_fg(Some(::termcolor::Color::Green)));
        let _ = write!(&mut buffer, "✓ ");
        let _ = buffer.reset();
        let _ = writeln!(&mut buffer, $($arg)*);
        let _ = bufwtr.print(&buffer);
    }};
}
