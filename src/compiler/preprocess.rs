//! Line-based preprocessor run ahead of the WGSL front end.
//!
//! Supports `#include "file"`, `#define NAME [value]`, `#undef`, `#ifdef`,
//! `#ifndef`, `#if <expr>`, `#elif <expr>`, `#else` and `#endif`. Directive
//! lines and lines in inactive regions become empty lines, so line numbers of
//! the root file survive until the first include.
//!
//! A file is included at most once per expansion; repeated or cyclic includes
//! expand to nothing.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::compiler::sources::ShaderSourceSet;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("{file}:{line}: #{directive} block is never closed")]
    Unterminated {
        file: String,
        line: usize,
        directive: String,
    },

    #[error("{file}:{line}: #{directive} without a matching #if")]
    Stray {
        file: String,
        line: usize,
        directive: String,
    },

    #[error("{file}:{line}: unknown directive #{directive}")]
    UnknownDirective {
        file: String,
        line: usize,
        directive: String,
    },

    #[error("{file}:{line}: included file '{name}' not found")]
    MissingInclude {
        file: String,
        line: usize,
        name: String,
    },

    #[error("{file}:{line}: {message}")]
    Malformed {
        file: String,
        line: usize,
        message: String,
    },
}

/// Expand `source` with `defines` predefined and includes resolved from `includes`.
pub fn preprocess(
    source_name: &str,
    source: &str,
    defines: &BTreeMap<String, String>,
    includes: &ShaderSourceSet,
) -> Result<String, PreprocessError> {
    let mut state = Preprocessor {
        includes,
        defines: defines
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        included: HashSet::new(),
        out: Vec::new(),
    };
    state.included.insert(source_name.to_string());
    state.expand(source_name, source)?;
    let mut text = state.out.join("\n");
    text.push('\n');
    Ok(text)
}

struct Preprocessor<'a> {
    includes: &'a ShaderSourceSet,
    defines: HashMap<String, String>,
    included: HashSet<String>,
    out: Vec<String>,
}

struct Frame {
    directive: &'static str,
    line: usize,
    parent_active: bool,
    active: bool,
    taken: bool,
    seen_else: bool,
}

impl Preprocessor<'_> {
    fn expand(&mut self, file: &str, source: &str) -> Result<(), PreprocessError> {
        let mut stack: Vec<Frame> = Vec::new();

        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            let active = stack.last().is_none_or(|f| f.active);
            let trimmed = raw.trim_start();

            let Some(directive_line) = trimmed.strip_prefix('#') else {
                let text = if active {
                    self.substitute(raw)
                } else {
                    String::new()
                };
                self.out.push(text);
                continue;
            };

            let directive_line = strip_comment(directive_line).trim();
            let (directive, rest) = match directive_line.find(char::is_whitespace) {
                Some(split) => (&directive_line[..split], directive_line[split..].trim()),
                None => (directive_line, ""),
            };
            let malformed = |message: String| PreprocessError::Malformed {
                file: file.to_string(),
                line,
                message,
            };
            let stray = |directive: &str| PreprocessError::Stray {
                file: file.to_string(),
                line,
                directive: directive.to_string(),
            };

            match directive {
                "ifdef" | "ifndef" => {
                    let name = single_ident(rest)
                        .ok_or_else(|| malformed(format!("#{directive} expects one identifier")))?;
                    let defined = self.defines.contains_key(name);
                    let cond = if directive == "ifdef" { defined } else { !defined };
                    stack.push(Frame {
                        directive: if directive == "ifdef" { "ifdef" } else { "ifndef" },
                        line,
                        parent_active: active,
                        active: active && cond,
                        taken: cond,
                        seen_else: false,
                    });
                }
                "if" => {
                    let cond = if active {
                        self.eval(rest).map_err(malformed)?
                    } else {
                        false
                    };
                    stack.push(Frame {
                        directive: "if",
                        line,
                        parent_active: active,
                        active: active && cond,
                        taken: cond,
                        seen_else: false,
                    });
                }
                "elif" => {
                    let frame = stack.last().ok_or_else(|| stray("elif"))?;
                    if frame.seen_else {
                        return Err(malformed("#elif after #else".to_string()));
                    }
                    let cond = if frame.parent_active && !frame.taken {
                        self.eval(rest).map_err(malformed)?
                    } else {
                        false
                    };
                    if let Some(frame) = stack.last_mut() {
                        frame.active = frame.parent_active && cond;
                        frame.taken |= cond;
                    }
                }
                "else" => {
                    let frame = stack.last_mut().ok_or_else(|| stray("else"))?;
                    if frame.seen_else {
                        return Err(malformed("duplicate #else".to_string()));
                    }
                    frame.active = frame.parent_active && !frame.taken;
                    frame.taken = true;
                    frame.seen_else = true;
                }
                "endif" => {
                    stack.pop().ok_or_else(|| stray("endif"))?;
                }
                _ if !active => {}
                "define" => {
                    let (name, value) = match rest.find(char::is_whitespace) {
                        Some(split) => (&rest[..split], rest[split..].trim()),
                        None => (rest, ""),
                    };
                    if single_ident(name).is_none() {
                        return Err(malformed("#define expects an identifier".to_string()));
                    }
                    self.defines.insert(name.to_string(), value.to_string());
                }
                "undef" => {
                    let name = single_ident(rest)
                        .ok_or_else(|| malformed("#undef expects one identifier".to_string()))?;
                    self.defines.remove(name);
                }
                "include" => {
                    let name = include_target(rest)
                        .ok_or_else(|| malformed("#include expects \"file\" or <file>".to_string()))?;
                    self.out.push(String::new());
                    if self.included.insert(name.to_string()) {
                        let includes = self.includes;
                        let body = includes.get(name).ok_or_else(|| {
                            PreprocessError::MissingInclude {
                                file: file.to_string(),
                                line,
                                name: name.to_string(),
                            }
                        })?;
                        self.expand(name, body)?;
                    }
                    continue;
                }
                other => {
                    return Err(PreprocessError::UnknownDirective {
                        file: file.to_string(),
                        line,
                        directive: other.to_string(),
                    });
                }
            }
            self.out.push(String::new());
        }

        if let Some(open) = stack.pop() {
            return Err(PreprocessError::Unterminated {
                file: file.to_string(),
                line: open.line,
                directive: open.directive.to_string(),
            });
        }
        Ok(())
    }

    /// Replace identifiers that name a define with its value, up to a `//` comment.
    fn substitute(&self, line: &str) -> String {
        if self.defines.is_empty() {
            return line.to_string();
        }
        let (code, comment) = match line.find("//") {
            Some(at) => line.split_at(at),
            None => (line, ""),
        };
        let mut out = String::with_capacity(line.len());
        let mut chars = code.char_indices().peekable();
        while let Some((start, ch)) = chars.next() {
            if ch.is_ascii_alphabetic() || ch == '_' {
                let mut end = start + ch.len_utf8();
                while let Some(&(i, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        end = i + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &code[start..end];
                match self.defines.get(word) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(word),
                }
            } else if ch.is_ascii_digit() {
                // Keep literal suffixes such as `1u` or `0x7fu` intact.
                out.push(ch);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' || next == '.' {
                        out.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
            } else {
                out.push(ch);
            }
        }
        out.push_str(comment);
        out
    }

    fn eval(&self, expr: &str) -> Result<bool, String> {
        let tokens = tokenize(expr)?;
        if tokens.is_empty() {
            return Err("#if expects an expression".to_string());
        }
        let mut parser = ExprParser {
            tokens: &tokens,
            pos: 0,
            defines: &self.defines,
        };
        let value = parser.or()?;
        if parser.pos != tokens.len() {
            return Err(format!("unexpected token in expression '{expr}'"));
        }
        Ok(value != 0)
    }
}

fn strip_comment(s: &str) -> &str {
    match s.find("//") {
        Some(at) => &s[..at],
        None => s,
    }
}

fn single_ident(s: &str) -> Option<&str> {
    let s = s.trim();
    let mut chars = s.chars();
    let first = chars.next()?;
    ((first.is_ascii_alphabetic() || first == '_') && chars.all(|c| c.is_ascii_alphanumeric() || c == '_'))
        .then_some(s)
}

fn include_target(s: &str) -> Option<&str> {
    let s = s.trim();
    let inner = s
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .or_else(|| s.strip_prefix('<').and_then(|r| r.strip_suffix('>')))?;
    (!inner.is_empty()).then_some(inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    Not,
    And,
    Or,
    Eq,
    Ne,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if bytes.get(i + 1) == Some(&b'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
                let value = expr[start..i]
                    .parse()
                    .map_err(|_| format!("integer literal '{}' out of range", &expr[start..i]))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(expr[start..i].to_string()));
            }
            other => return Err(format!("unexpected character '{other}' in expression")),
        }
    }
    Ok(tokens)
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    defines: &'a HashMap<String, String>,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<i64, String> {
        let mut value = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            value = i64::from(value != 0 || rhs != 0);
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<i64, String> {
        let mut value = self.equality()?;
        while self.eat(&Token::And) {
            let rhs = self.equality()?;
            value = i64::from(value != 0 && rhs != 0);
        }
        Ok(value)
    }

    fn equality(&mut self) -> Result<i64, String> {
        let lhs = self.unary()?;
        if self.eat(&Token::Eq) {
            return Ok(i64::from(lhs == self.unary()?));
        }
        if self.eat(&Token::Ne) {
            return Ok(i64::from(lhs != self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, String> {
        if self.eat(&Token::Not) {
            return Ok(i64::from(self.unary()? == 0));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<i64, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;
        match token {
            Token::Int(v) => Ok(v),
            Token::LParen => {
                let value = self.or()?;
                if !self.eat(&Token::RParen) {
                    return Err("missing ')'".to_string());
                }
                Ok(value)
            }
            Token::Ident(name) if name == "defined" => {
                let parens = self.eat(&Token::LParen);
                let Some(Token::Ident(target)) = self.tokens.get(self.pos).cloned() else {
                    return Err("defined expects an identifier".to_string());
                };
                self.pos += 1;
                if parens && !self.eat(&Token::RParen) {
                    return Err("missing ')' after defined".to_string());
                }
                Ok(i64::from(self.defines.contains_key(&target)))
            }
            Token::Ident(name) => match self.defines.get(&name) {
                None => Ok(0),
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| format!("'{name}' does not expand to an integer")),
            },
            other => Err(format!("unexpected {other:?} in expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defines(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn run(source: &str, pairs: &[(&str, &str)]) -> Result<String, PreprocessError> {
        preprocess("test.wgsl", source, &defines(pairs), &ShaderSourceSet::new())
    }

    #[test]
    fn if_else_selects_by_define_value() {
        let src = "a\n#if FAST\nfast\n#else\nslow\n#endif\nb\n";
        assert_eq!(run(src, &[("FAST", "1")]).unwrap(), "a\n\nfast\n\n\n\nb\n");
        assert_eq!(run(src, &[("FAST", "0")]).unwrap(), "a\n\n\n\nslow\n\nb\n");
    }

    #[test]
    fn undefined_name_is_false_but_ifdef_sees_zero_defines() {
        let src = "#if MISSING\nx\n#endif\n#ifdef OFF\ny\n#endif\n";
        let out = run(src, &[("OFF", "0")]).unwrap();
        assert!(!out.contains('x'));
        assert!(out.contains('y'));
    }

    #[test]
    fn elif_chain_takes_first_true_branch() {
        let src = "#if A\na\n#elif B\nb\n#elif C\nc\n#else\nd\n#endif\n";
        let out = run(src, &[("A", "0"), ("B", "1"), ("C", "1")]).unwrap();
        assert_eq!(out.trim(), "b");
    }

    #[test]
    fn expressions_combine_with_logic_operators() {
        let src = "#if defined(A) && !(B || C == 2)\nyes\n#endif\n";
        assert_eq!(run(src, &[("A", ""), ("B", "0"), ("C", "1")]).unwrap().trim(), "yes");
        assert_eq!(run(src, &[("A", ""), ("B", "0"), ("C", "2")]).unwrap().trim(), "");
    }

    #[test]
    fn nested_blocks_in_inactive_region_are_skipped_without_evaluation() {
        let src = "#if 0\n#if (((\n#bogus\n#endif\n#endif\nok\n";
        assert_eq!(run(src, &[]).unwrap().trim(), "ok");
    }

    #[test]
    fn define_substitutes_in_code() {
        let src = "#define SIZE 64u\nconst N: u32 = SIZE; // SIZE stays in comments\n";
        let out = run(src, &[]).unwrap();
        assert_eq!(out, "\nconst N: u32 = 64u; // SIZE stays in comments\n");
    }

    #[test]
    fn literal_suffixes_are_not_substituted() {
        let out = run("let x = 0x1fu + 2u;\n", &[("u", "BAD"), ("x", "BAD")]).unwrap();
        assert_eq!(out, "let BAD = 0x1fu + 2u;\n");
    }

    #[test]
    fn includes_expand_once() {
        let includes = ShaderSourceSet::new()
            .with("lib.wgsl", "#include \"lib.wgsl\"\nfn lib() {}")
            .with("other.wgsl", "#include \"lib.wgsl\"\nfn other() {}");
        let src = "#include \"lib.wgsl\"\n#include \"other.wgsl\"\nfn main() {}\n";
        let out = preprocess("main.wgsl", src, &BTreeMap::new(), &includes).unwrap();
        assert_eq!(out.matches("fn lib()").count(), 1);
        assert!(out.contains("fn other()"));
        assert!(out.contains("fn main()"));
    }

    #[test]
    fn errors_name_file_and_line() {
        let err = run("x\n#if 1\ny\n", &[]).unwrap_err();
        assert_eq!(
            err,
            PreprocessError::Unterminated {
                file: "test.wgsl".to_string(),
                line: 2,
                directive: "if".to_string()
            }
        );

        assert!(matches!(run("#endif\n", &[]), Err(PreprocessError::Stray { line: 1, .. })));
        assert!(matches!(
            run("\n#pragma once\n", &[]),
            Err(PreprocessError::UnknownDirective { line: 2, .. })
        ));
        assert!(matches!(
            run("#include \"nowhere.wgsl\"\n", &[]),
            Err(PreprocessError::MissingInclude { .. })
        ));
        assert!(matches!(
            run("#if A\n#else\n#else\n#endif\n", &[]),
            Err(PreprocessError::Malformed { line: 3, .. })
        ));
    }
}
