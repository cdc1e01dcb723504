//! Help text carried by command tree nodes.

/// Descriptive help attached to a command.
///
/// The short description is a one-line summary shown in listings; the long
/// description is the full help body. [`crate::Command::process_help`] fills
/// an empty long description from the short one so every documented command
/// has a usable help page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelpText {
    /// One-line summary of what the command does.
    pub short_description: String,
    /// Full help body shown by the help command.
    pub long_description: String,
}

impl HelpText {
    /// Creates help text with only a short description.
    pub fn short(description: impl Into<String>) -> Self {
        Self {
            short_description: description.into(),
            long_description: String::new(),
        }
    }
}
