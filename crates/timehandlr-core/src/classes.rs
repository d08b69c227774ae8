//! Default class-name editing.
//!
//! A thing's visual state is a space-delimited list of class names. These
//! functions are the default add/remove operations a class cycle applies;
//! hosts that keep classes in another representation swap them out through
//! [`ClassOps`].

/// Signature of a class edit: takes the current class string and one class
/// name, returns the new class string.
pub type ClassEdit = fn(&str, &str) -> String;

/// The pair of edits a class cycle uses to apply and retract phases.
#[derive(Debug, Clone, Copy)]
pub struct ClassOps {
    /// Applies a class name.
    pub add: ClassEdit,
    /// Retracts a class name.
    pub remove: ClassEdit,
}

impl Default for ClassOps {
    fn default() -> Self {
        Self {
            add: add_class,
            remove: remove_class,
        }
    }
}

/// Append `name` as a new token.
///
/// Duplicates are kept on purpose so that a cycle retracting its own class
/// never strips an identical class the thing carried beforehand.
pub fn add_class(current: &str, name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return current.to_owned();
    }
    let current = current.trim_end();
    if current.is_empty() {
        name.to_owned()
    } else {
        format!("{current} {name}")
    }
}

/// Remove the last token equal to `name`. Unknown names leave the string
/// unchanged apart from whitespace normalization.
pub fn remove_class(current: &str, name: &str) -> String {
    let mut tokens: Vec<&str> = current.split_whitespace().collect();
    if let Some(pos) = tokens.iter().rposition(|token| *token == name) {
        tokens.remove(pos);
    }
    tokens.join(" ")
}

/// Whether `name` is one of the tokens in `current`.
pub fn has_class(current: &str, name: &str) -> bool {
    current.split_whitespace().any(|token| token == name)
}
