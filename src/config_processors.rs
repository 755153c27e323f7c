use justconfig::error::ConfigError;
use justconfig::item::{MapAction, StringItem};

/// Strips one pair of matching quotes from configuration strings.
pub trait Unquote
where
    Self: Sized,
{
    fn unquote(self) -> Result<StringItem, ConfigError>;
}

fn strip_quotes(value: &str) -> Option<&str> {
    let value = value.trim();
    ['"', '\'']
        .iter()
        .find_map(|quote| value.strip_prefix(*quote)?.strip_suffix(*quote))
}

impl Unquote for Result<StringItem, ConfigError> {
    /// Trims every value; `"path"` and `'path'` become `path`, unquoted values are kept.
    fn unquote(self) -> Result<StringItem, ConfigError> {
        self?.map(|value| {
            let trimmed = value.trim();
            match strip_quotes(trimmed) {
                Some(inner) => MapAction::Replace(vec![inner.to_owned()]),
                None if trimmed.len() != value.len() => {
                    MapAction::Replace(vec![trimmed.to_owned()])
                }
                None => MapAction::Keep,
            }
        })
    }
}
