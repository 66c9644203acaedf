//! Rule-level CSS model
//!
//! Parses stylesheet text into a coarse rule tree and serializes it back in
//! compact form. Selectors, at-rule preludes and declaration values stay as
//! raw text; only the structure (rules, nesting, declarations) is modeled,
//! which is all the merge/discard/prune passes need.
//!
//! Parsing is lenient: rules that fail to parse are skipped with a warning
//! and parsing continues at the next rule.

use cssparser::{Delimiter, ParseError, Parser, ParserInput, Token};

use crate::errors::CssError;

/// A parsed stylesheet
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stylesheet {
    pub rules: Vec<CssRule>,
}

/// One top-level or nested rule
#[derive(Debug, Clone, PartialEq)]
pub enum CssRule {
    /// Selector list with a declaration block
    Style(StyleRule),
    /// Conditional or grouping at-rule with nested rules (`@media`,
    /// `@supports`, `@layer`, `@container`)
    Group(GroupRule),
    /// At-rule whose block is a declaration list (`@font-face`, `@page`)
    Declarations(DeclarationsRule),
    /// `@keyframes` (including vendor-prefixed forms); the body is kept as
    /// raw text since keyframe selectors are not element selectors
    Keyframes(KeyframesRule),
    /// Block-less at-rule (`@import`, `@charset`, `@namespace`)
    Statement(StatementRule),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleRule {
    pub selectors: Vec<String>,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupRule {
    /// At-keyword without the `@` (e.g. `media`)
    pub name: String,
    /// Prelude text (e.g. `screen and (max-width: 600px)`)
    pub condition: String,
    pub rules: Vec<CssRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclarationsRule {
    pub name: String,
    pub prelude: String,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyframesRule {
    /// At-keyword without the `@`, vendor prefix included
    pub name: String,
    /// Animation name as written (may be quoted)
    pub animation_name: String,
    /// Raw body text between the braces
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementRule {
    pub name: String,
    pub prelude: String,
}

impl Stylesheet {
    /// Parse stylesheet text, skipping rules that fail to parse.
    #[must_use]
    pub fn parse(css: &str) -> Self {
        let mut input = ParserInput::new(css);
        let mut parser = Parser::new(&mut input);
        let rules = parse_rule_list(&mut parser);
        Stylesheet { rules }
    }

    /// Parse stylesheet text, failing when non-empty input yields no rules.
    pub fn parse_checked(css: &str) -> Result<Self, CssError> {
        let sheet = Self::parse(css);
        if sheet.rules.is_empty() && !css.trim().is_empty() {
            return Err(CssError::Parse(
                "stylesheet contains no parsable rules".to_string(),
            ));
        }
        Ok(sheet)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Serialize in compact form.
    #[must_use]
    pub fn to_css_string(&self) -> String {
        let mut out = String::new();
        for rule in &self.rules {
            rule.write(&mut out);
        }
        out
    }
}

impl CssRule {
    /// Canonical compact serialization, also used as the dedupe key.
    #[must_use]
    pub fn to_css_string(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut String) {
        match self {
            CssRule::Style(rule) => {
                out.push_str(&rule.selectors.join(","));
                out.push('{');
                write_declarations(&rule.declarations, out);
                out.push('}');
            }
            CssRule::Group(group) => {
                out.push('@');
                out.push_str(&group.name);
                if !group.condition.is_empty() {
                    out.push(' ');
                    out.push_str(&group.condition);
                }
                out.push('{');
                for rule in &group.rules {
                    rule.write(out);
                }
                out.push('}');
            }
            CssRule::Declarations(rule) => {
                out.push('@');
                out.push_str(&rule.name);
                if !rule.prelude.is_empty() {
                    out.push(' ');
                    out.push_str(&rule.prelude);
                }
                out.push('{');
                write_declarations(&rule.declarations, out);
                out.push('}');
            }
            CssRule::Keyframes(rule) => {
                out.push('@');
                out.push_str(&rule.name);
                out.push(' ');
                out.push_str(&rule.animation_name);
                out.push('{');
                out.push_str(&rule.body);
                out.push('}');
            }
            CssRule::Statement(rule) => {
                out.push('@');
                out.push_str(&rule.name);
                if !rule.prelude.is_empty() {
                    out.push(' ');
                    out.push_str(&rule.prelude);
                }
                out.push(';');
            }
        }
    }
}

fn write_declarations(declarations: &[Declaration], out: &mut String) {
    for (index, declaration) in declarations.iter().enumerate() {
        if index > 0 {
            out.push(';');
        }
        out.push_str(&declaration.property);
        out.push(':');
        out.push_str(&declaration.value);
        if declaration.important {
            out.push_str("!important");
        }
    }
}

fn parse_rule_list(parser: &mut Parser<'_, '_>) -> Vec<CssRule> {
    let mut rules = Vec::new();

    loop {
        parser.skip_whitespace();

        if parser.is_exhausted() {
            break;
        }

        match parse_rule(parser) {
            Ok(Some(rule)) => rules.push(rule),
            Ok(None) => {}
            Err(message) => {
                log::warn!("CSS parse error: {message}; skipping to next rule");
                skip_to_next_rule(parser);
            }
        }
    }

    rules
}

fn parse_rule(parser: &mut Parser<'_, '_>) -> Result<Option<CssRule>, String> {
    let state = parser.state();
    let token = match parser.next() {
        Ok(token) => token.clone(),
        Err(_) => return Ok(None),
    };

    match token {
        Token::AtKeyword(name) => {
            let name = name.to_string();
            parse_at_rule(parser, name).map(Some)
        }
        _ => {
            parser.reset(&state);
            parse_style_rule(parser).map(Some)
        }
    }
}

fn parse_style_rule(parser: &mut Parser<'_, '_>) -> Result<CssRule, String> {
    let prelude = parse_prelude(parser, Delimiter::CurlyBracketBlock)?;

    if prelude.is_empty() {
        return Err("empty selector".to_string());
    }

    match parser.next() {
        Ok(Token::CurlyBracketBlock) => {}
        _ => return Err("expected '{' after selector".to_string()),
    }

    let declarations = parser
        .parse_nested_block(|block| Ok::<_, ParseError<'_, ()>>(parse_declaration_list(block)))
        .map_err(|e| format!("{e:?}"))?;

    Ok(CssRule::Style(StyleRule {
        selectors: split_selector_list(&prelude),
        declarations,
    }))
}

fn parse_at_rule(parser: &mut Parser<'_, '_>, name: String) -> Result<CssRule, String> {
    let prelude = parse_prelude(parser, Delimiter::CurlyBracketBlock | Delimiter::Semicolon)?;

    let token = match parser.next() {
        Ok(token) => token.clone(),
        // At-rule terminated by end of input
        Err(_) => {
            return Ok(CssRule::Statement(StatementRule { name, prelude }));
        }
    };

    match token {
        Token::Semicolon => Ok(CssRule::Statement(StatementRule { name, prelude })),
        Token::CurlyBracketBlock => {
            if name.to_ascii_lowercase().ends_with("keyframes") {
                let body = parser
                    .parse_nested_block(|block| {
                        let start = block.position();
                        while block.next_including_whitespace().is_ok() {}
                        Ok::<_, ParseError<'_, ()>>(block.slice_from(start).trim().to_string())
                    })
                    .map_err(|e| format!("{e:?}"))?;
                Ok(CssRule::Keyframes(KeyframesRule {
                    name,
                    animation_name: prelude,
                    body,
                }))
            } else if is_declaration_at_rule(&name) {
                let declarations = parser
                    .parse_nested_block(|block| {
                        Ok::<_, ParseError<'_, ()>>(parse_declaration_list(block))
                    })
                    .map_err(|e| format!("{e:?}"))?;
                Ok(CssRule::Declarations(DeclarationsRule {
                    name,
                    prelude,
                    declarations,
                }))
            } else {
                let rules = parser
                    .parse_nested_block(|block| Ok::<_, ParseError<'_, ()>>(parse_rule_list(block)))
                    .map_err(|e| format!("{e:?}"))?;
                Ok(CssRule::Group(GroupRule {
                    name,
                    condition: prelude,
                    rules,
                }))
            }
        }
        other => Err(format!("unexpected token {other:?} after @{name} prelude")),
    }
}

fn is_declaration_at_rule(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "font-face" | "page" | "counter-style" | "property" | "viewport" | "font-palette-values"
    )
}

/// Capture prelude text up to (not including) one of `delimiters`.
fn parse_prelude(
    parser: &mut Parser<'_, '_>,
    delimiters: cssparser::Delimiters,
) -> Result<String, String> {
    parser
        .parse_until_before(delimiters, |p| {
            let start = p.position();
            while p.next_including_whitespace().is_ok() {}
            Ok::<_, ParseError<'_, ()>>(collapse_whitespace(p.slice_from(start).trim()))
        })
        .map_err(|e| format!("{e:?}"))
}

fn parse_declaration_list(parser: &mut Parser<'_, '_>) -> Vec<Declaration> {
    let mut declarations = Vec::new();

    loop {
        parser.skip_whitespace();

        if parser.is_exhausted() {
            break;
        }

        let property = match parser.expect_ident() {
            Ok(name) => name.to_string(),
            Err(_) => {
                skip_declaration(parser);
                continue;
            }
        };

        if parser.expect_colon().is_err() {
            skip_declaration(parser);
            continue;
        }

        parser.skip_whitespace();
        let value_start = parser.position();
        let mut important = false;

        loop {
            match parser.next() {
                Ok(Token::Semicolon) | Err(_) => break,
                Ok(Token::Delim('!')) => {
                    if parser
                        .try_parse(|p| p.expect_ident_matching("important"))
                        .is_ok()
                    {
                        important = true;
                    }
                    // Consume the declaration terminator as well
                    loop {
                        match parser.next() {
                            Ok(Token::Semicolon) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                    break;
                }
                Ok(Token::Function(_))
                | Ok(Token::ParenthesisBlock)
                | Ok(Token::SquareBracketBlock)
                | Ok(Token::CurlyBracketBlock) => {
                    // Keep nested contents inside the raw value slice
                    let _ = parser.parse_nested_block(|block| {
                        while block.next_including_whitespace().is_ok() {}
                        Ok::<_, ParseError<'_, ()>>(())
                    });
                }
                Ok(_) => {}
            }
        }

        let raw = parser.slice_from(value_start).trim();
        let value = trim_declaration_value(raw, important);

        if value.is_empty() {
            continue;
        }

        declarations.push(Declaration {
            property,
            value: collapse_whitespace(&value),
            important,
        });
    }

    declarations
}

/// Strip the trailing `;` and, when flagged, the `!important` suffix from a
/// raw value slice.
fn trim_declaration_value(raw: &str, important: bool) -> String {
    let mut value = raw.strip_suffix(';').unwrap_or(raw).trim_end();
    if important {
        if let Some(bang) = value.rfind('!') {
            value = value[..bang].trim_end();
        }
    }
    value.to_string()
}

/// Split a selector prelude on top-level commas, respecting parentheses,
/// brackets and quoted strings (`:is(a, b)` stays intact).
pub(crate) fn split_selector_list(prelude: &str) -> Vec<String> {
    let mut selectors = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in prelude.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                '(' | '[' => {
                    depth += 1;
                    current.push(ch);
                }
                ')' | ']' => {
                    depth = depth.saturating_sub(1);
                    current.push(ch);
                }
                ',' if depth == 0 => {
                    let selector = current.trim();
                    if !selector.is_empty() {
                        selectors.push(selector.to_string());
                    }
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }

    let selector = current.trim();
    if !selector.is_empty() {
        selectors.push(selector.to_string());
    }

    selectors
}

/// Collapse whitespace runs to single spaces outside quoted strings.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for ch in text.chars() {
        match quote {
            Some(q) => {
                out.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => {
                if ch.is_whitespace() {
                    pending_space = true;
                    continue;
                }
                if pending_space {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    pending_space = false;
                }
                if ch == '"' || ch == '\'' {
                    quote = Some(ch);
                }
                out.push(ch);
            }
        }
    }

    out
}

/// Skip to the end of the current malformed rule (error recovery).
fn skip_to_next_rule(parser: &mut Parser<'_, '_>) {
    loop {
        match parser.next() {
            Ok(Token::CurlyBracketBlock) => {
                let _ = parser.parse_nested_block(|block| {
                    while block.next_including_whitespace().is_ok() {}
                    Ok::<_, ParseError<'_, ()>>(())
                });
                return;
            }
            Ok(Token::Semicolon) => return,
            Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Skip to the end of the current malformed declaration (error recovery).
fn skip_declaration(parser: &mut Parser<'_, '_>) {
    loop {
        match parser.next() {
            Ok(Token::Semicolon) | Err(_) => return,
            Ok(Token::CurlyBracketBlock) => {
                let _ = parser.parse_nested_block(|block| {
                    while block.next_including_whitespace().is_ok() {}
                    Ok::<_, ParseError<'_, ()>>(())
                });
            }
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_rule() {
        let sheet = Stylesheet::parse("a { color: red; }");
        assert_eq!(sheet.rules.len(), 1);
        match &sheet.rules[0] {
            CssRule::Style(rule) => {
                assert_eq!(rule.selectors, vec!["a"]);
                assert_eq!(rule.declarations.len(), 1);
                assert_eq!(rule.declarations[0].property, "color");
                assert_eq!(rule.declarations[0].value, "red");
                assert!(!rule.declarations[0].important);
            }
            other => panic!("expected style rule, got {other:?}"),
        }
    }

    #[test]
    fn serializes_compactly() {
        let sheet = Stylesheet::parse("a { color: red; }\n\np  ,  div { margin : 0   auto ; }");
        assert_eq!(sheet.to_css_string(), "a{color:red}p,div{margin:0 auto}");
    }

    #[test]
    fn keeps_important_flag() {
        let sheet = Stylesheet::parse("a { color: red !important; background: blue }");
        assert_eq!(
            sheet.to_css_string(),
            "a{color:red!important;background:blue}"
        );
    }

    #[test]
    fn splits_selector_lists_at_top_level_only() {
        let sheet = Stylesheet::parse(":is(a, b) span, div { color: red }");
        match &sheet.rules[0] {
            CssRule::Style(rule) => {
                assert_eq!(rule.selectors, vec![":is(a, b) span", "div"]);
            }
            other => panic!("expected style rule, got {other:?}"),
        }
    }

    #[test]
    fn parses_media_group() {
        let sheet = Stylesheet::parse("@media screen and (max-width: 600px) { a { color: red } }");
        match &sheet.rules[0] {
            CssRule::Group(group) => {
                assert_eq!(group.name, "media");
                assert_eq!(group.condition, "screen and (max-width: 600px)");
                assert_eq!(group.rules.len(), 1);
            }
            other => panic!("expected group rule, got {other:?}"),
        }
    }

    #[test]
    fn parses_font_face_and_keyframes() {
        let css = r#"
            @font-face { font-family: "Open Sans"; src: url(a.woff2); }
            @keyframes spin { from { transform: rotate(0deg) } to { transform: rotate(360deg) } }
        "#;
        let sheet = Stylesheet::parse(css);
        assert_eq!(sheet.rules.len(), 2);
        assert!(matches!(&sheet.rules[0], CssRule::Declarations(rule) if rule.name == "font-face"));
        match &sheet.rules[1] {
            CssRule::Keyframes(rule) => {
                assert_eq!(rule.animation_name, "spin");
                assert!(rule.body.contains("rotate(360deg)"));
            }
            other => panic!("expected keyframes, got {other:?}"),
        }
    }

    #[test]
    fn parses_import_statement() {
        let sheet = Stylesheet::parse("@import url(\"extra.css\") screen; a{color:red}");
        assert!(
            matches!(&sheet.rules[0], CssRule::Statement(rule) if rule.name == "import"),
            "expected statement first"
        );
        assert_eq!(sheet.rules.len(), 2);
    }

    #[test]
    fn recovers_from_malformed_rule() {
        let sheet = Stylesheet::parse("a { color: red } @ } p { margin: 0 }");
        let css = sheet.to_css_string();
        assert!(css.contains("a{color:red}"));
        assert!(css.contains("p{margin:0}"));
    }

    #[test]
    fn keeps_url_values_intact() {
        let sheet = Stylesheet::parse(".hero { background: url('img/bg, small.png') no-repeat; }");
        match &sheet.rules[0] {
            CssRule::Style(rule) => {
                assert_eq!(
                    rule.declarations[0].value,
                    "url('img/bg, small.png') no-repeat"
                );
            }
            other => panic!("expected style rule, got {other:?}"),
        }
    }

    #[test]
    fn parse_checked_rejects_garbage() {
        assert!(Stylesheet::parse_checked("this is not a stylesheet").is_err());
        assert!(Stylesheet::parse_checked("").unwrap().is_empty());
        assert!(Stylesheet::parse_checked("a{color:red}").is_ok());
    }
}
