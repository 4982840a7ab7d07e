//! Issue locator codec
//!
//! A [`LocatorCodec`] is compiled once from a comment template and then used
//! three ways: to render a locator into a comment, to recognise comments
//! written by it (coarse pattern), and to parse them back (strict pattern).
//!
//! # Template syntax
//!
//! | Syntax | Meaning |
//! |---|---|
//! | `{id}` or `{1}` | tracker-side issue id |
//! | `{deepLink}` or `{2}` | browser link to the issue |
//! | `{tracker}` or `{0}` | configured tracker name (fixed text) |
//! | `[[ ... ]]` | optional section, dropped when a field inside is absent |
//! | `{{` / `}}` | literal braces |
//!
//! A placeholder outside `[[ ... ]]` forms an implicit section with the
//! word before it and the separator after it. In `ID {id} Location
//! {deepLink}` an absent id drops `ID ` and the following space, so the
//! comment never carries an empty token.

use crate::error::{DecodeError, TemplateError};
use crate::locator::IssueLocator;
use regex::Regex;
use std::fmt;

/// Template used when none is configured
pub const DEFAULT_TEMPLATE: &str =
    "--- Vulnerability submitted to {tracker}: [[ID {id} ]]Location {deepLink}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Id,
    DeepLink,
}

impl Slot {
    fn value(self, locator: &IssueLocator) -> Option<&str> {
        match self {
            Self::Id => locator.id(),
            Self::DeepLink => locator.deep_link(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::DeepLink => "deepLink",
        }
    }

    fn group(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::DeepLink => "deep_link",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Slot(Slot),
    Optional(Vec<Token>),
}

/// Compiled comment template
#[derive(Clone)]
pub struct LocatorCodec {
    template: String,
    tokens: Vec<Token>,
    coarse: Regex,
    strict: Regex,
}

impl LocatorCodec {
    /// Compile a template that does not use `{tracker}`
    ///
    /// # Errors
    /// Returns [`TemplateError`] if the template is invalid
    pub fn new(template: &str) -> Result<Self, TemplateError> {
        Self::builder(template).build()
    }

    /// Start building a codec
    #[must_use]
    pub fn builder(template: impl Into<String>) -> LocatorCodecBuilder {
        LocatorCodecBuilder {
            template: template.into(),
            tracker_name: None,
        }
    }

    /// Source template
    #[inline]
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Pattern recognising any comment this codec could have written
    ///
    /// Anchored at both ends, one greedy group per placeholder.
    #[inline]
    #[must_use]
    pub fn match_pattern(&self) -> &Regex {
        &self.coarse
    }

    /// Check if a comment looks like one of ours
    #[must_use]
    pub fn is_match(&self, comment: &str) -> bool {
        self.coarse.is_match(trim_line_end(comment))
    }

    /// Render a locator into a comment
    #[must_use]
    pub fn encode(&self, locator: &IssueLocator) -> String {
        let mut out = String::with_capacity(self.template.len() + 32);
        for token in &self.tokens {
            render(token, locator, &mut out);
        }
        out
    }

    /// Parse a locator back from a comment
    ///
    /// # Errors
    /// - [`DecodeError::NoMatch`] if the comment is not one of ours
    /// - [`DecodeError::Malformed`] if it is, but the fields cannot be
    ///   recovered
    pub fn decode(&self, comment: &str) -> Result<IssueLocator, DecodeError> {
        let comment = trim_line_end(comment);
        if comment.trim().is_empty() || !self.coarse.is_match(comment) {
            return Err(DecodeError::NoMatch);
        }
        let captures = self
            .strict
            .captures(comment)
            .ok_or_else(|| DecodeError::malformed(comment, "locator fields cannot be separated"))?;
        let field = |slot: Slot| match captures.name(slot.group()) {
            Some(m) if m.as_str().is_empty() => Err(DecodeError::malformed(
                comment,
                format!("empty {} field", slot.name()),
            )),
            other => Ok(other.map(|m| m.as_str().to_string())),
        };
        IssueLocator::new(field(Slot::Id)?, field(Slot::DeepLink)?)
            .ok_or_else(|| DecodeError::malformed(comment, "neither id nor deep link present"))
    }

    /// Find the latest locator among candidate comments
    ///
    /// Comments are expected oldest first. Malformed comments are logged
    /// and collected, never fatal.
    pub fn scan<I, S>(&self, comments: I) -> Scan
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut scan = Scan::default();
        for comment in comments {
            match self.decode(comment.as_ref()) {
                Ok(locator) => scan.locator = Some(locator),
                Err(DecodeError::NoMatch) => {}
                Err(error) => {
                    tracing::warn!(%error, "ignoring malformed locator comment");
                    scan.malformed.push(comment.as_ref().to_string());
                }
            }
        }
        scan
    }
}

impl fmt::Debug for LocatorCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocatorCodec")
            .field("template", &self.template)
            .field("match_pattern", &self.coarse.as_str())
            .finish_non_exhaustive()
    }
}

/// Builder for [`LocatorCodec`]
#[derive(Debug, Clone)]
pub struct LocatorCodecBuilder {
    template: String,
    tracker_name: Option<String>,
}

impl LocatorCodecBuilder {
    /// Name substituted for `{tracker}` / `{0}`
    #[must_use]
    pub fn tracker_name(mut self, name: impl Into<String>) -> Self {
        self.tracker_name = Some(name.into());
        self
    }

    /// Compile the template
    ///
    /// # Errors
    /// Returns [`TemplateError`] if the template is invalid
    pub fn build(self) -> Result<LocatorCodec, TemplateError> {
        let tokens = parse_template(&self.template, self.tracker_name.as_deref())?;
        validate(&tokens)?;
        let tokens = implicit_sections(tokens);

        let coarse = compile(&format!(
            "(?s)^{}$",
            pattern(&tokens, &|_| "(.*)".to_string())
        ))?;
        let strict = compile(&format!(
            "(?s)^{}$",
            pattern(&tokens, &|slot| format!("(?P<{}>.*?)", slot.group()))
        ))?;

        Ok(LocatorCodec {
            template: self.template,
            tokens,
            coarse,
            strict,
        })
    }
}

/// Result of scanning candidate comments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    /// Latest decodable locator
    pub locator: Option<IssueLocator>,
    /// Comments that matched the template but could not be decoded
    pub malformed: Vec<String>,
}

fn trim_line_end(comment: &str) -> &str {
    comment.trim_end_matches(['\r', '\n'])
}

fn render(token: &Token, locator: &IssueLocator, out: &mut String) {
    match token {
        Token::Literal(text) => out.push_str(text),
        Token::Slot(slot) => out.push_str(slot.value(locator).unwrap_or_default()),
        Token::Optional(inner) => {
            let complete = inner.iter().all(|t| match t {
                Token::Slot(slot) => slot.value(locator).is_some(),
                _ => true,
            });
            if complete {
                for t in inner {
                    render(t, locator, out);
                }
            }
        }
    }
}

fn pattern(tokens: &[Token], slot_pattern: &dyn Fn(Slot) -> String) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Literal(text) => out.push_str(&regex::escape(text)),
            Token::Slot(slot) => out.push_str(&slot_pattern(*slot)),
            Token::Optional(inner) => {
                out.push_str("(?:");
                out.push_str(&pattern(inner, slot_pattern));
                out.push_str(")?");
            }
        }
    }
    out
}

fn compile(source: &str) -> Result<Regex, TemplateError> {
    Regex::new(source).map_err(|e| TemplateError::Pattern(e.to_string()))
}

fn parse_template(template: &str, tracker: Option<&str>) -> Result<Vec<Token>, TemplateError> {
    let mut top = Vec::new();
    let mut section: Option<(usize, Vec<Token>)> = None;
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((at, c)) = chars.next() {
        let next = chars.peek().map(|&(_, n)| n);
        match (c, next) {
            ('{', Some('{')) | ('}', Some('}')) => {
                chars.next();
                literal.push(c);
            }
            ('{', _) => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, ch)) => name.push(ch),
                        None => return Err(TemplateError::UnterminatedPlaceholder(at)),
                    }
                }
                let slot = match name.trim() {
                    "tracker" | "0" => {
                        literal.push_str(tracker.ok_or(TemplateError::MissingTrackerName)?);
                        continue;
                    }
                    "id" | "1" => Slot::Id,
                    "deepLink" | "2" => Slot::DeepLink,
                    _ => return Err(TemplateError::UnknownPlaceholder(name.clone())),
                };
                let target = section.as_mut().map_or(&mut top, |(_, tokens)| tokens);
                flush(&mut literal, target);
                target.push(Token::Slot(slot));
            }
            ('[', Some('[')) => {
                chars.next();
                if section.is_some() {
                    return Err(TemplateError::NestedSection(at));
                }
                flush(&mut literal, &mut top);
                section = Some((at, Vec::new()));
            }
            (']', Some(']')) if section.is_some() => {
                chars.next();
                if let Some((_, mut tokens)) = section.take() {
                    flush(&mut literal, &mut tokens);
                    top.push(Token::Optional(tokens));
                }
            }
            _ => literal.push(c),
        }
    }

    if let Some((at, _)) = section {
        return Err(TemplateError::UnterminatedSection(at));
    }
    flush(&mut literal, &mut top);
    Ok(top)
}

fn flush(literal: &mut String, target: &mut Vec<Token>) {
    if !literal.is_empty() {
        target.push(Token::Literal(std::mem::take(literal)));
    }
}

/// Wrap each top-level placeholder with the word before it and the
/// separator after it. A placeholder with no literal neighbours stays bare.
fn implicit_sections(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut rest = tokens.into_iter().peekable();

    while let Some(token) = rest.next() {
        let Token::Slot(slot) = token else {
            out.push(token);
            continue;
        };

        let mut section = Vec::new();
        let mut drained = false;
        if let Some(Token::Literal(text)) = out.last_mut() {
            let at = word_start(text);
            let prefix = text.split_off(at);
            drained = text.is_empty();
            if !prefix.is_empty() {
                section.push(Token::Literal(prefix));
            }
        }
        if drained {
            out.pop();
        }

        section.push(Token::Slot(slot));

        let mut consumed = false;
        if let Some(Token::Literal(text)) = rest.peek_mut() {
            let end = separator_end(text);
            let suffix: String = text.drain(..end).collect();
            consumed = text.is_empty();
            if !suffix.is_empty() {
                section.push(Token::Literal(suffix));
            }
        }
        if consumed {
            rest.next();
        }

        if section.len() == 1 {
            out.extend(section);
        } else {
            out.push(Token::Optional(section));
        }
    }
    out
}

/// Start of the last word, trailing whitespace included
fn word_start(text: &str) -> usize {
    let trimmed = text.trim_end();
    trimmed
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(at, c)| at + c.len_utf8())
}

/// End of the leading word and the whitespace after it
fn separator_end(text: &str) -> usize {
    let word = text.find(char::is_whitespace).unwrap_or(text.len());
    let rest = &text[word..];
    word + (rest.len() - rest.trim_start().len())
}

fn validate(tokens: &[Token]) -> Result<(), TemplateError> {
    let flat: Vec<&Token> = tokens
        .iter()
        .flat_map(|token| match token {
            Token::Optional(inner) => inner.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .collect();

    let slots: Vec<Slot> = flat
        .iter()
        .filter_map(|t| match t {
            Token::Slot(slot) => Some(*slot),
            _ => None,
        })
        .collect();
    if slots.is_empty() {
        return Err(TemplateError::NoLocatorField);
    }
    for (i, slot) in slots.iter().enumerate() {
        if slots[..i].contains(slot) {
            return Err(TemplateError::DuplicatePlaceholder(slot.name().to_string()));
        }
    }
    for pair in flat.windows(2) {
        if let [Token::Slot(a), Token::Slot(b)] = pair {
            return Err(TemplateError::AdjacentPlaceholders(
                a.name().to_string(),
                b.name().to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jira(template: &str) -> LocatorCodec {
        LocatorCodec::builder(template).tracker_name("JIRA").build().unwrap()
    }

    #[test]
    fn positional_template_encodes_exactly() {
        let codec = jira("--- submitted to {0}: ID {1} Location {2}");
        let locator = IssueLocator::link("http://x/y#z").with_id("42");
        let comment = codec.encode(&locator);
        assert_eq!(comment, "--- submitted to JIRA: ID 42 Location http://x/y#z");
        assert_eq!(codec.decode(&comment).unwrap(), locator);
    }

    #[test]
    fn default_template_drops_optional_id_section() {
        let codec = jira(DEFAULT_TEMPLATE);
        let with_id = IssueLocator::link("https://t/browse/P-1").with_id("P-1");
        let without_id = IssueLocator::link("https://t/browse/P-2");

        assert_eq!(
            codec.encode(&with_id),
            "--- Vulnerability submitted to JIRA: ID P-1 Location https://t/browse/P-1"
        );
        assert_eq!(
            codec.encode(&without_id),
            "--- Vulnerability submitted to JIRA: Location https://t/browse/P-2"
        );
        assert_eq!(codec.decode(&codec.encode(&without_id)).unwrap().id(), None);
    }

    #[test]
    fn absent_field_outside_section_decodes_absent() {
        let codec = LocatorCodec::new("Bug {id} at <{deepLink}>").unwrap();
        let comment = codec.encode(&IssueLocator::link("http://b/1"));
        assert_eq!(comment, "at <http://b/1>");
        let decoded = codec.decode(&comment).unwrap();
        assert_eq!(decoded.id(), None);
        assert_eq!(decoded.deep_link(), Some("http://b/1"));
    }

    #[test]
    fn positional_template_drops_label_of_absent_id() {
        let codec = jira("--- submitted to {0}: ID {1} Location {2}");
        let locator = IssueLocator::link("http://x/y#z");
        let comment = codec.encode(&locator);
        assert_eq!(comment, "--- submitted to JIRA: Location http://x/y#z");
        assert_eq!(codec.decode(&comment).unwrap(), locator);

        let id_only = IssueLocator::new(Some("42".into()), None).unwrap();
        assert_eq!(codec.encode(&id_only), "--- submitted to JIRA: ID 42 ");
        assert_eq!(codec.decode(&codec.encode(&id_only)).unwrap(), id_only);
    }

    #[test]
    fn fields_may_contain_whitespace() {
        let codec = jira(DEFAULT_TEMPLATE);
        let locator = IssueLocator::link("http://alm/defects?name=Bug 7").with_id("Bug 7");
        let comment = codec.encode(&locator);
        assert_eq!(
            comment,
            "--- Vulnerability submitted to JIRA: ID Bug 7 Location http://alm/defects?name=Bug 7"
        );
        assert_eq!(codec.decode(&comment).unwrap(), locator);
    }

    #[test]
    fn link_only_template_never_yields_id() {
        let codec = LocatorCodec::new("see {deepLink}").unwrap();
        let decoded = codec.decode("see http://b/2").unwrap();
        assert_eq!(decoded, IssueLocator::link("http://b/2"));
    }

    #[test]
    fn metacharacters_are_escaped_and_match_is_anchored() {
        let codec = LocatorCodec::new("(bug) [{id}] *{{ {deepLink} }}+?").unwrap();
        let locator = IssueLocator::link("http://z").with_id("9");
        let comment = codec.encode(&locator);
        assert_eq!(comment, "(bug) [9] *{ http://z }+?");
        assert!(codec.is_match(&comment));
        assert_eq!(codec.decode(&comment).unwrap(), locator);

        assert!(!codec.is_match(&format!("prefix {comment}")));
        assert!(!codec.is_match(&format!("{comment} suffix")));
        assert!(!codec.is_match("bug 9 http://z"));
    }

    #[test]
    fn no_match_is_distinct_from_malformed() {
        let codec = jira(DEFAULT_TEMPLATE);
        assert_eq!(codec.decode("LGTM, closing"), Err(DecodeError::NoMatch));

        assert_eq!(codec.decode(""), Err(DecodeError::NoMatch));

        let empty_id = "--- Vulnerability submitted to JIRA: ID  Location http://x";
        assert!(codec.decode(empty_id).unwrap_err().is_malformed());

        let empty = "--- Vulnerability submitted to JIRA: Location ";
        assert!(codec.decode(empty).unwrap_err().is_malformed());

        let bare = "--- Vulnerability submitted to JIRA: ";
        assert!(codec.decode(bare).unwrap_err().is_malformed());
    }

    #[test]
    fn trailing_newline_is_tolerated() {
        let codec = jira(DEFAULT_TEMPLATE);
        let comment = format!("{}\r\n", codec.encode(&IssueLocator::link("http://a")));
        assert_eq!(codec.decode(&comment).unwrap(), IssueLocator::link("http://a"));
    }

    #[test]
    fn scan_takes_latest_and_collects_malformed() {
        let codec = jira(DEFAULT_TEMPLATE);
        let old = codec.encode(&IssueLocator::link("http://a/1").with_id("A-1"));
        let new = codec.encode(&IssueLocator::link("http://a/2").with_id("A-2"));
        let bad = "--- Vulnerability submitted to JIRA: ID  Location x";
        let scan = codec.scan([old.as_str(), "unrelated", new.as_str(), bad]);
        assert_eq!(scan.locator.unwrap().id(), Some("A-2"));
        assert_eq!(scan.malformed, vec![bad.to_string()]);

        assert_eq!(codec.scan(Vec::<String>::new()), Scan::default());
    }

    #[test]
    fn template_errors() {
        assert_eq!(
            LocatorCodec::new("{nope} {id}").unwrap_err(),
            TemplateError::UnknownPlaceholder("nope".into())
        );
        assert_eq!(
            LocatorCodec::new("{id} {1}").unwrap_err(),
            TemplateError::DuplicatePlaceholder("id".into())
        );
        assert_eq!(LocatorCodec::new("plain").unwrap_err(), TemplateError::NoLocatorField);
        assert_eq!(
            LocatorCodec::new("x {id").unwrap_err(),
            TemplateError::UnterminatedPlaceholder(2)
        );
        assert_eq!(
            LocatorCodec::new("[[a {id}").unwrap_err(),
            TemplateError::UnterminatedSection(0)
        );
        assert_eq!(
            LocatorCodec::new("[[a [[b]] {id}]]").unwrap_err(),
            TemplateError::NestedSection(4)
        );
        assert_eq!(
            LocatorCodec::new("{tracker} {id}").unwrap_err(),
            TemplateError::MissingTrackerName
        );
        assert!(matches!(
            LocatorCodec::new("[[{id}]]{deepLink}").unwrap_err(),
            TemplateError::AdjacentPlaceholders(..)
        ));
    }
}
