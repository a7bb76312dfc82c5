//! Parsing of `run` arguments into a chain of tap invocations.
//!
//! Invocations are separated by a lone `--`. Each starts with a tap
//! identifier followed by its arguments: positional values, `--key=value`
//! keywords and `--flag` switches.

use std::collections::BTreeMap;

use datatap_core::TapError;

/// Token separating two tap invocations.
pub const DELIMITER: &str = "--";

/// Arguments of one tap invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapArgs {
    pub positional: Vec<String>,
    /// `--key=value` keywords, and `--flag` switches with no value.
    pub keywords: BTreeMap<String, Option<String>>,
}

impl TapArgs {
    /// Whether the `--name` switch was given.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.keywords.contains_key(name)
    }

    /// Value of `--name=value`, if given with a value.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.keywords.get(name).and_then(Option::as_deref)
    }

    fn push(&mut self, arg: String) {
        match arg.strip_prefix("--") {
            Some(keyword) if !keyword.is_empty() => match keyword.split_once('=') {
                Some((key, value)) => {
                    self.keywords.insert(key.to_string(), Some(value.to_string()));
                }
                None => {
                    self.keywords.insert(keyword.to_string(), None);
                }
            },
            _ => self.positional.push(arg),
        }
    }
}

/// One tap invocation in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSegment {
    pub ident: String,
    pub args: TapArgs,
}

/// Splits `args` into tap invocations, leftmost first.
///
/// # Errors
///
/// Returns a resolution error when the chain is empty or an invocation has
/// no tap identifier.
pub fn split_chain<I, S>(args: I) -> Result<Vec<ChainSegment>, TapError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut groups: Vec<Vec<String>> = vec![Vec::new()];
    for arg in args {
        let arg = arg.into();
        if arg == DELIMITER {
            groups.push(Vec::new());
        } else if let Some(current) = groups.last_mut() {
            current.push(arg);
        }
    }
    if groups.len() == 1 && groups[0].is_empty() {
        return Err(TapError::resolution("", "no tap given"));
    }

    let mut segments = Vec::with_capacity(groups.len());
    for (index, group) in groups.into_iter().enumerate() {
        let mut values = group.into_iter();
        let ident = match values.next() {
            Some(ident) if !ident.starts_with('-') => ident,
            Some(other) => {
                return Err(TapError::resolution(
                    other,
                    format!("invocation #{} must start with a tap identifier", index + 1),
                ));
            }
            None => {
                return Err(TapError::resolution(
                    DELIMITER,
                    format!("invocation #{} is empty", index + 1),
                ));
            }
        };
        let mut args = TapArgs::default();
        for value in values {
            args.push(value);
        }
        segments.push(ChainSegment { ident, args });
    }
    Ok(segments)
}

/// A chain failure attributed to the invocation that raised it.
#[derive(Debug)]
pub struct PipelineError {
    /// Invocation being built or committed when the error occurred.
    pub stage: &'static str,
    pub source: TapError,
}

impl PipelineError {
    pub fn new(stage: &'static str, source: TapError) -> Self {
        Self { stage, source }
    }

    /// Tap named in the diagnostic.
    #[must_use]
    pub fn tap(&self) -> &'static str {
        self.source.tap().unwrap_or(self.stage)
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.tap(), self.source.kind(), self.source)
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use datatap_core::ErrorKind;

    use super::*;

    #[test]
    fn test_split_single_invocation() {
        let chain = split_chain(["Model", "media.photo", "media.video"]).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].ident, "Model");
        assert_eq!(chain[0].args.positional, ["media.photo", "media.video"]);
        assert!(chain[0].args.keywords.is_empty());
    }

    #[test]
    fn test_split_keywords_and_flags() {
        let chain = split_chain([
            "File", "in.zip", "--", "Zip", "--", "JSON", "--pretty", "--attachments=omit", "--",
            "Stream",
        ])
        .unwrap();
        let idents: Vec<_> = chain.iter().map(|segment| segment.ident.as_str()).collect();
        assert_eq!(idents, ["File", "Zip", "JSON", "Stream"]);
        let json = &chain[2].args;
        assert!(json.flag("pretty"));
        assert_eq!(json.value("pretty"), None);
        assert_eq!(json.value("attachments"), Some("omit"));
        assert!(json.positional.is_empty());
    }

    #[test]
    fn test_keyword_value_may_contain_equals() {
        let chain = split_chain(["Zip", "--originator=a=b"]).unwrap();
        assert_eq!(chain[0].args.value("originator"), Some("a=b"));
    }

    #[test]
    fn test_lone_dash_is_positional() {
        let chain = split_chain(["File", "-"]).unwrap();
        assert_eq!(chain[0].args.positional, ["-"]);
    }

    #[test]
    fn test_empty_chain_is_rejected() {
        let error = split_chain(Vec::<String>::new()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn test_empty_invocation_is_rejected() {
        let error = split_chain(["Model", "a.b", "--", "--", "Stream"]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Resolution);
        assert!(error.to_string().contains("#2"));

        let trailing = split_chain(["Model", "a.b", "--"]).unwrap_err();
        assert!(trailing.to_string().contains("#2 is empty"));
    }

    #[test]
    fn test_invocation_must_start_with_ident() {
        let error = split_chain(["--pretty", "JSON"]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn test_diagnostic_names_stage_when_error_has_no_tap() {
        let error = PipelineError::new("File", TapError::resolution("x", "nope"));
        assert_eq!(error.tap(), "File");
        assert_eq!(error.to_string(), "File: resolution: cannot resolve 'x': nope");

        let closed = PipelineError::new("File", TapError::Closed { tap: "Zip" });
        assert_eq!(closed.to_string(), "Zip: closed: Zip is closed");
    }
}
