//! Build arguments and environment substitution.
//!
//! ARG declarations register a key with an optional default; user-supplied
//! values override defaults. Substitution resolves `$NAME` and `${NAME}`
//! references against a replacement environment in which stage environment
//! variables shadow build arguments of the same name.

use std::collections::HashMap;

use lamina_core::error::{LaminaError, Result};

/// Registry of declared build arguments plus user-supplied overrides.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    /// Declared args in declaration order, with their defaults
    declared: Vec<(String, Option<String>)>,
    /// Values supplied by the user; override any default
    overrides: HashMap<String, String>,
}

impl BuildArgs {
    pub fn new(overrides: HashMap<String, String>) -> Self {
        Self {
            declared: Vec::new(),
            overrides,
        }
    }

    /// Register an ARG declaration. Re-declaring a key updates its default.
    pub fn declare(&mut self, key: &str, default: Option<&str>) {
        if let Some(entry) = self.declared.iter_mut().find(|(k, _)| k == key) {
            entry.1 = default.map(str::to_string);
        } else {
            self.declared
                .push((key.to_string(), default.map(str::to_string)));
        }
    }

    /// Effective value of a declared argument, if it has one.
    pub fn value_of(&self, key: &str) -> Option<String> {
        let (_, default) = self.declared.iter().find(|(k, _)| k == key)?;
        self.overrides.get(key).cloned().or_else(|| default.clone())
    }

    /// The replacement environment for substitution: declared args with
    /// values, overlaid by `env` so environment variables shadow same-named
    /// arguments.
    pub fn replacement_envs(&self, env: &[(String, String)]) -> Vec<(String, String)> {
        let mut merged: Vec<(String, String)> = self
            .declared
            .iter()
            .filter_map(|(key, _)| self.value_of(key).map(|value| (key.clone(), value)))
            .collect();
        merged.extend(env.iter().cloned());
        merged
    }
}

/// Substitute `$NAME` and `${NAME}` references in `input` using `envs`,
/// later entries shadowing earlier ones. Unknown variables become empty;
/// `\$` escapes a literal dollar sign.
pub fn substitute(input: &str, envs: &[(String, String)]) -> Result<String> {
    let mut lookup: HashMap<&str, &str> = HashMap::new();
    for (key, value) in envs {
        lookup.insert(key.as_str(), value.as_str());
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            },
            '$' => match chars.peek() {
                Some('{') => {
                    chars.next();
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => {
                                return Err(LaminaError::AnalysisError(format!(
                                    "unterminated variable reference in '{}'",
                                    input
                                )))
                            }
                        }
                    }
                    out.push_str(lookup.get(name.as_str()).copied().unwrap_or(""));
                }
                Some(ch) if ch.is_ascii_alphabetic() || *ch == '_' => {
                    let mut name = String::new();
                    while let Some(ch) = chars.peek() {
                        if ch.is_ascii_alphanumeric() || *ch == '_' {
                            name.push(*ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    out.push_str(lookup.get(name.as_str()).copied().unwrap_or(""));
                }
                _ => out.push('$'),
            },
            other => out.push(other),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_braced_and_bare() {
        let env = envs(&[("OUT", "/out")]);
        assert_eq!(substitute("${OUT}/bin", &env).unwrap(), "/out/bin");
        assert_eq!(substitute("$OUT/bin", &env).unwrap(), "/out/bin");
    }

    #[test]
    fn test_substitute_unknown_is_empty() {
        assert_eq!(substitute("$MISSING/x", &[]).unwrap(), "/x");
    }

    #[test]
    fn test_substitute_escaped_dollar() {
        let env = envs(&[("X", "v")]);
        assert_eq!(substitute(r"\$X", &env).unwrap(), "$X");
    }

    #[test]
    fn test_substitute_bare_dollar_kept() {
        assert_eq!(substitute("cost: 5$", &[]).unwrap(), "cost: 5$");
    }

    #[test]
    fn test_substitute_unterminated_brace_fails() {
        assert!(substitute("${OOPS", &[]).is_err());
    }

    #[test]
    fn test_substitute_later_entries_shadow() {
        let env = envs(&[("X", "first"), ("X", "second")]);
        assert_eq!(substitute("$X", &env).unwrap(), "second");
    }

    #[test]
    fn test_declare_and_override() {
        let mut args = BuildArgs::new(HashMap::from([(
            "VERSION".to_string(),
            "2.0".to_string(),
        )]));
        args.declare("VERSION", Some("1.0"));
        args.declare("NAME", Some("app"));
        args.declare("EMPTY", None);

        assert_eq!(args.value_of("VERSION").unwrap(), "2.0");
        assert_eq!(args.value_of("NAME").unwrap(), "app");
        assert_eq!(args.value_of("EMPTY"), None);
        // Undeclared args have no value even when supplied.
        assert_eq!(args.value_of("UNDECLARED"), None);
    }

    #[test]
    fn test_replacement_envs_env_shadows_arg() {
        let mut args = BuildArgs::new(HashMap::new());
        args.declare("PATH_PREFIX", Some("/from-arg"));

        let env = envs(&[("PATH_PREFIX", "/from-env")]);
        let replacement = args.replacement_envs(&env);
        assert_eq!(
            substitute("$PATH_PREFIX", &replacement).unwrap(),
            "/from-env"
        );
    }

    #[test]
    fn test_replacement_envs_includes_arg_without_env() {
        let mut args = BuildArgs::new(HashMap::new());
        args.declare("OUT", Some("/out"));
        let replacement = args.replacement_envs(&[]);
        assert_eq!(substitute("${OUT}", &replacement).unwrap(), "/out");
    }
}
