//! Choosing which variants run: attribute expressions and name globs.
//!
//! A selection argument wrapped in parentheses is an attribute expression,
//! e.g. `("group:input-tools" && !informational)`. Anything else is a list
//! of name globs such as `inputs.Physical*`.

use regex::Regex;

use crate::core::errors::{IthError, Result};

/// Convert a glob to an anchored regex.
///
/// `*` matches any run of characters and `?` exactly one; everything else
/// is literal.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex_str = String::with_capacity(pattern.len() * 2);
    regex_str.push('^');
    for c in pattern.chars() {
        match c {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(c);
            }
            c => regex_str.push(c),
        }
    }
    regex_str.push('$');
    Regex::new(&regex_str).map_err(|err| IthError::InvalidConfig {
        details: format!("invalid glob pattern {pattern:?}: {err}"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Attr(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let err = |details: String| IthError::InvalidConfig { details };
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '&' | '|' => {
                let c = chars[i];
                if chars.get(i + 1) != Some(&c) {
                    return Err(err(format!("expected {c}{c} at offset {i} in {input:?}")));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '"' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&c| c == '"')
                    .map(|p| start + p)
                    .ok_or_else(|| err(format!("unterminated string in {input:?}")))?;
                tokens.push(Token::Attr(chars[start..end].iter().collect()));
                i = end + 1;
            }
            _ => {
                let start = i;
                while i < chars.len() && is_attr_char(chars[i]) {
                    i += 1;
                }
                if i == start {
                    return Err(err(format!(
                        "unexpected {:?} at offset {i} in {input:?}",
                        chars[i]
                    )));
                }
                tokens.push(Token::Attr(chars[start..i].iter().collect()));
            }
        }
    }
    Ok(tokens)
}

fn is_attr_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '*' | '?')
}

/// Boolean expression over a variant's attributes.
#[derive(Debug, Clone)]
pub enum AttrExpr {
    /// True when some attribute matches the glob.
    Attr(Regex),
    Not(Box<AttrExpr>),
    And(Box<AttrExpr>, Box<AttrExpr>),
    Or(Box<AttrExpr>, Box<AttrExpr>),
}

impl AttrExpr {
    /// Parse an expression. `&&` binds tighter than `||`; `!` binds tightest.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            input,
        };
        let expr = parser.or()?;
        if parser.pos != tokens.len() {
            return Err(parser.error("trailing tokens"));
        }
        Ok(expr)
    }

    pub fn matches(&self, attrs: &[String]) -> bool {
        match self {
            Self::Attr(re) => attrs.iter().any(|a| re.is_match(a)),
            Self::Not(inner) => !inner.matches(attrs),
            Self::And(a, b) => a.matches(attrs) && b.matches(attrs),
            Self::Or(a, b) => a.matches(attrs) || b.matches(attrs),
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    input: &'a str,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> IthError {
        IthError::InvalidConfig {
            details: format!("bad attribute expression {:?}: {what}", self.input),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn or(&mut self) -> Result<AttrExpr> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = AttrExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<AttrExpr> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = AttrExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<AttrExpr> {
        match self.peek().cloned() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(AttrExpr::Not(Box::new(self.unary()?)))
            }
            Some(Token::Open) => {
                self.pos += 1;
                let inner = self.or()?;
                if self.peek() != Some(&Token::Close) {
                    return Err(self.error("missing )"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(Token::Attr(name)) => {
                self.pos += 1;
                Ok(AttrExpr::Attr(glob_to_regex(&name)?))
            }
            _ => Err(self.error("expected attribute, ! or (")),
        }
    }
}

/// Which variants a run covers.
#[derive(Debug, Clone, Default)]
pub enum Selection {
    #[default]
    All,
    Names(Vec<Regex>),
    Attrs(AttrExpr),
}

impl Selection {
    /// Interpret command-line style patterns. No patterns selects all.
    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        match patterns {
            [] => Ok(Self::All),
            [one] if one.as_ref().trim_start().starts_with('(') => {
                Ok(Self::Attrs(AttrExpr::parse(one.as_ref())?))
            }
            many => many
                .iter()
                .map(|p| glob_to_regex(p.as_ref()))
                .collect::<Result<Vec<_>>>()
                .map(Self::Names),
        }
    }

    pub fn matches(&self, name: &str, attrs: &[String]) -> bool {
        match self {
            Self::All => true,
            Self::Names(globs) => globs.iter().any(|g| g.is_match(name)),
            Self::Attrs(expr) => expr.matches(attrs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn expression_precedence_and_negation() {
        let expr = AttrExpr::parse(r#"("group:input-tools" && !informational) || group:mainline"#).unwrap();
        assert!(expr.matches(&attrs(&["group:input-tools"])));
        assert!(!expr.matches(&attrs(&["group:input-tools", "informational"])));
        assert!(expr.matches(&attrs(&["group:mainline", "informational"])));
        assert!(!expr.matches(&attrs(&[])));
    }

    #[test]
    fn attribute_globs() {
        let expr = AttrExpr::parse("group:input-tools* && !*_unstable").unwrap();
        assert!(expr.matches(&attrs(&["group:input-tools-upstream"])));
        assert!(!expr.matches(&attrs(&["group:input-tools", "input-tools_unstable"])));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for bad in ["(a && b", "a & b", "a &&", "&& a", "a b", "\"open"] {
            assert!(AttrExpr::parse(bad).is_err(), "{bad} parsed");
        }
    }

    #[test]
    fn selection_by_name_or_expression() {
        let by_name = Selection::parse(&["inputs.Physical*", "inputs.VirtualKeyboardTyping.*"]).unwrap();
        assert!(by_name.matches("inputs.PhysicalKeyboardNumpad", &[]));
        assert!(by_name.matches("inputs.VirtualKeyboardTyping.tablet", &[]));
        assert!(!by_name.matches("inputs.VirtualKeyboardTyping", &[]));

        let by_attr = Selection::parse(&["(group:input-tools)"]).unwrap();
        assert!(by_attr.matches("x.Y", &attrs(&["group:input-tools"])));
        assert!(Selection::parse::<&str>(&[]).unwrap().matches("x.Y", &[]));
    }
}
