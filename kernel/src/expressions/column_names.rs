use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::ops::Deref;

/// A reference to a top-level field of a dataset schema, by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnName {
    name: String,
}

impl ColumnName {
    /// Creates a new column name from the given field name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The field name this column refers to.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Consumes this column name and returns the underlying field name.
    pub fn into_inner(self) -> String {
        self.name
    }
}

impl Deref for ColumnName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.name
    }
}

impl Borrow<str> for ColumnName {
    fn borrow(&self) -> &str {
        &self.name
    }
}

impl From<&str> for ColumnName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ColumnName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl Display for ColumnName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Names that would not survive a round trip through SQL-ish display get backticks
        let plain = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if plain {
            write!(f, "{}", self.name)
        } else {
            write!(f, "`{}`", self.name.replace('`', "``"))
        }
    }
}

/// Creates a [`ColumnName`] from a string literal.
#[macro_export]
macro_rules! column_name {
    ( $name:literal ) => {
        $crate::expressions::ColumnName::new($name)
    };
}
#[doc(inline)]
pub use column_name;

/// Creates an [`Expression::Column`](crate::expressions::Expression::Column) from a string literal.
#[macro_export]
macro_rules! column_expr {
    ( $name:literal ) => {
        $crate::expressions::Expression::column($crate::expressions::column_name!($name))
    };
}
#[doc(inline)]
pub use column_expr;
