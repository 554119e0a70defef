//! Build-script parser.
//!
//! Parses a build script (Dockerfile dialect) into a sequence of stages,
//! each holding ordered instructions. Supports line continuations (`\`),
//! comments, and both shell and JSON (exec) forms for CMD/ENTRYPOINT.

pub mod args;
pub mod deps;
pub mod resolve;

pub use args::{substitute, BuildArgs};
pub use deps::stage_dependencies;
pub use resolve::resolve_stages;

use lamina_core::error::{LaminaError, Result};

/// Base reference meaning "start from an empty filesystem".
pub const NO_BASE_IMAGE: &str = "scratch";

/// A single build instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `FROM <image> [AS <alias>]`
    From {
        image: String,
        alias: Option<String>,
    },
    /// `RUN <command>` (shell form)
    Run { command: String },
    /// `COPY [--from=<stage>] <src>... <dst>`
    Copy {
        from: Option<String>,
        sources: Vec<String>,
        dest: String,
    },
    /// `WORKDIR <path>`
    Workdir { path: String },
    /// `ENV <key>=<value> ...` or `ENV <key> <value>`
    Env { pairs: Vec<(String, String)> },
    /// `ENTRYPOINT ["exec", "form"]` or `ENTRYPOINT command`
    Entrypoint { exec: Vec<String> },
    /// `CMD ["exec", "form"]` or `CMD command`
    Cmd { exec: Vec<String> },
    /// `EXPOSE <port>[/<proto>]`
    Expose { port: String },
    /// `LABEL <key>=<value>`
    Label { key: String, value: String },
    /// `USER <user>[:<group>]`
    User { user: String },
    /// `ARG <key>[=<default>]`
    Arg {
        key: String,
        default: Option<String>,
    },
}

/// One stage of a multi-stage build.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Position in the script, 0-based
    pub index: usize,
    /// Symbolic name from `FROM ... AS <name>`
    pub name: Option<String>,
    /// Base image reference (may be [`NO_BASE_IMAGE`])
    pub base_ref: String,
    /// Instructions in declaration order
    pub instructions: Vec<Instruction>,
}

/// Parsed build script: stages in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildScript {
    pub stages: Vec<Stage>,
}

impl BuildScript {
    /// Parse a build script from its text content.
    pub fn parse(content: &str) -> Result<Self> {
        let instructions = parse_lines(content)?;

        let mut stages: Vec<Stage> = Vec::new();
        let mut leading_args: Vec<Instruction> = Vec::new();

        for instruction in instructions {
            match instruction {
                Instruction::From { image, alias } => {
                    stages.push(Stage {
                        index: stages.len(),
                        name: alias,
                        base_ref: image,
                        instructions: Vec::new(),
                    });
                }
                other => match stages.last_mut() {
                    Some(stage) => stage.instructions.push(other),
                    None if matches!(other, Instruction::Arg { .. }) => leading_args.push(other),
                    None => {
                        return Err(LaminaError::ParseError(
                            "first instruction must be FROM (or ARG before FROM)".to_string(),
                        ))
                    }
                },
            }
        }

        if stages.is_empty() {
            return Err(LaminaError::ParseError(
                "build script is empty or contains no stages".to_string(),
            ));
        }

        // ARGs declared before the first FROM are replayed at the start of
        // the first stage.
        stages[0].instructions.splice(0..0, leading_args);

        Ok(BuildScript { stages })
    }

    /// Parse a build script from a file path.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LaminaError::ParseError(format!(
                "failed to read build script at {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Look up a stage by its symbolic name.
    pub fn stage_by_name(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name.as_deref() == Some(name))
    }
}

/// Re-parse a sequence of textual instruction lines, as found in
/// base-image-supplied onbuild triggers, through the same parser the main
/// script uses.
pub fn parse_commands(lines: &[String]) -> Result<Vec<Instruction>> {
    parse_lines(&lines.join("\n"))
}

fn parse_lines(content: &str) -> Result<Vec<Instruction>> {
    let logical_lines = join_continuation_lines(content);
    let mut instructions = Vec::new();

    for (line_num, line) in logical_lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(instruction) = parse_instruction(trimmed, line_num + 1)? {
            instructions.push(instruction);
        }
    }

    Ok(instructions)
}

/// Join lines ending with `\` into single logical lines.
fn join_continuation_lines(content: &str) -> Vec<String> {
    let mut logical_lines = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped.trim_end());
            current.push(' ');
        } else {
            current.push_str(line);
            logical_lines.push(current.clone());
            current.clear();
        }
    }

    if !current.is_empty() {
        logical_lines.push(current);
    }

    logical_lines
}

/// Parse a single logical line. Returns `None` for instructions the engine
/// deliberately does not model.
fn parse_instruction(line: &str, line_num: usize) -> Result<Option<Instruction>> {
    let (keyword, rest) = split_first_word(line);
    let keyword_upper = keyword.to_uppercase();

    let instruction = match keyword_upper.as_str() {
        "FROM" => parse_from(rest, line_num)?,
        "RUN" => parse_run(rest, line_num)?,
        "COPY" => parse_copy(rest, line_num)?,
        "WORKDIR" => parse_workdir(rest, line_num)?,
        "ENV" => parse_env(rest, line_num)?,
        "ENTRYPOINT" => parse_entrypoint(rest, line_num)?,
        "CMD" => parse_cmd(rest, line_num)?,
        "EXPOSE" => parse_expose(rest, line_num)?,
        "LABEL" => parse_label(rest, line_num)?,
        "USER" => parse_user(rest, line_num)?,
        "ARG" => parse_arg(rest, line_num)?,
        "ADD" | "VOLUME" | "SHELL" | "STOPSIGNAL" | "HEALTHCHECK" | "ONBUILD" | "MAINTAINER" => {
            tracing::warn!(
                line = line_num,
                instruction = keyword_upper.as_str(),
                "Unsupported instruction, skipping"
            );
            return Ok(None);
        }
        _ => {
            return Err(LaminaError::ParseError(format!(
                "line {}: unknown instruction '{}'",
                line_num, keyword
            )))
        }
    };

    Ok(Some(instruction))
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

// --- Individual instruction parsers ---

fn parse_from(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(LaminaError::ParseError(format!(
            "line {}: FROM requires an image argument",
            line_num
        )));
    }

    let parts: Vec<&str> = rest.splitn(3, char::is_whitespace).collect();
    let (image, alias) = if parts.len() >= 3 && parts[1].eq_ignore_ascii_case("AS") {
        (parts[0].to_string(), Some(parts[2].trim().to_string()))
    } else {
        (parts[0].to_string(), None)
    };

    Ok(Instruction::From { image, alias })
}

fn parse_run(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(LaminaError::ParseError(format!(
            "line {}: RUN requires a command",
            line_num
        )));
    }

    let command = if rest.starts_with('[') {
        parse_json_array(rest, line_num)?.join(" ")
    } else {
        rest.to_string()
    };

    Ok(Instruction::Run { command })
}

fn parse_copy(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(LaminaError::ParseError(format!(
            "line {}: COPY requires source and destination",
            line_num
        )));
    }

    let mut from = None;
    let mut remaining = rest;
    while remaining.starts_with("--") {
        let (flag, after) = split_first_word(remaining);
        if let Some(stage) = flag.strip_prefix("--from=") {
            from = Some(stage.to_string());
        } else {
            tracing::warn!(line = line_num, flag, "Ignoring unsupported COPY flag");
        }
        remaining = after;
    }

    let parts = split_words(remaining);
    if parts.len() < 2 {
        return Err(LaminaError::ParseError(format!(
            "line {}: COPY requires at least one source and a destination",
            line_num
        )));
    }

    let dest = parts.last().unwrap().clone();
    let sources = parts[..parts.len() - 1].to_vec();

    Ok(Instruction::Copy {
        from,
        sources,
        dest,
    })
}

fn parse_workdir(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(LaminaError::ParseError(format!(
            "line {}: WORKDIR requires a path",
            line_num
        )));
    }
    Ok(Instruction::Workdir {
        path: rest.to_string(),
    })
}

fn parse_env(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(LaminaError::ParseError(format!(
            "line {}: ENV requires a key and value",
            line_num
        )));
    }

    // Two forms: `ENV KEY=VALUE [KEY=VALUE ...]` and legacy `ENV KEY VALUE`.
    let first_word_has_eq = match (rest.find('='), rest.find(char::is_whitespace)) {
        (Some(eq), Some(ws)) => eq < ws,
        (Some(_), None) => true,
        (None, _) => false,
    };

    if first_word_has_eq {
        let mut pairs = Vec::new();
        for word in split_words(rest) {
            let Some(eq_pos) = word.find('=') else {
                return Err(LaminaError::ParseError(format!(
                    "line {}: ENV expects key=value, got '{}'",
                    line_num, word
                )));
            };
            pairs.push((word[..eq_pos].to_string(), word[eq_pos + 1..].to_string()));
        }
        return Ok(Instruction::Env { pairs });
    }

    let (key, value) = split_first_word(rest);
    Ok(Instruction::Env {
        pairs: vec![(key.to_string(), value.to_string())],
    })
}

fn parse_entrypoint(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(LaminaError::ParseError(format!(
            "line {}: ENTRYPOINT requires an argument",
            line_num
        )));
    }

    let exec = if rest.starts_with('[') {
        parse_json_array(rest, line_num)?
    } else {
        shell_form(rest)
    };

    Ok(Instruction::Entrypoint { exec })
}

fn parse_cmd(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(LaminaError::ParseError(format!(
            "line {}: CMD requires an argument",
            line_num
        )));
    }

    let exec = if rest.starts_with('[') {
        parse_json_array(rest, line_num)?
    } else {
        shell_form(rest)
    };

    Ok(Instruction::Cmd { exec })
}

fn parse_expose(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(LaminaError::ParseError(format!(
            "line {}: EXPOSE requires a port",
            line_num
        )));
    }
    Ok(Instruction::Expose {
        port: rest.split_whitespace().next().unwrap_or(rest).to_string(),
    })
}

fn parse_label(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(LaminaError::ParseError(format!(
            "line {}: LABEL requires key=value",
            line_num
        )));
    }

    if let Some(eq_pos) = rest.find('=') {
        let key = rest[..eq_pos].trim().to_string();
        let value = unquote(rest[eq_pos + 1..].trim());
        Ok(Instruction::Label { key, value })
    } else {
        let (key, value) = split_first_word(rest);
        Ok(Instruction::Label {
            key: key.to_string(),
            value: unquote(value),
        })
    }
}

fn parse_user(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(LaminaError::ParseError(format!(
            "line {}: USER requires a username",
            line_num
        )));
    }
    Ok(Instruction::User {
        user: rest.split_whitespace().next().unwrap_or(rest).to_string(),
    })
}

fn parse_arg(rest: &str, line_num: usize) -> Result<Instruction> {
    if rest.is_empty() {
        return Err(LaminaError::ParseError(format!(
            "line {}: ARG requires a name",
            line_num
        )));
    }

    if let Some(eq_pos) = rest.find('=') {
        Ok(Instruction::Arg {
            key: rest[..eq_pos].to_string(),
            default: Some(unquote(&rest[eq_pos + 1..])),
        })
    } else {
        Ok(Instruction::Arg {
            key: rest.trim().to_string(),
            default: None,
        })
    }
}

// --- Helpers ---

/// Shell form: wrap in `sh -c`.
fn shell_form(rest: &str) -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        rest.to_string(),
    ]
}

/// Parse a JSON array string like `["a", "b"]` into a Vec<String>.
fn parse_json_array(s: &str, line_num: usize) -> Result<Vec<String>> {
    serde_json::from_str(s).map_err(|e| {
        LaminaError::ParseError(format!("line {}: invalid JSON array '{}': {}", line_num, s, e))
    })
}

/// Remove surrounding quotes from a string.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Whitespace split that respects single and double quotes.
fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in s.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
}
