//! Model-side reduction of a stylesheet to its critical subset
//!
//! The in-page probe answers which normalized selectors have an element
//! starting above the fold and which group conditions currently hold.
//! Everything here is pure filtering over the parsed model driven by those
//! answers, so it is testable without a browser.
//!
//! Selectors are normalized before probing: pseudo-elements and
//! interaction-state pseudo-classes cannot match in a freshly loaded page,
//! so they are stripped and the base selector decides. A selector that
//! normalizes to nothing cannot be probed at all and is kept.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::css::stylesheet::{CssRule, Declaration, Stylesheet, collapse_whitespace};
use crate::css::urls;
use crate::options::Pattern;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProbePayload {
    pub selectors: Vec<String>,
    pub media_conditions: Vec<String>,
    pub supports_conditions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ProbeOutcome {
    pub critical_selectors: Vec<String>,
    pub active_media: Vec<String>,
    pub active_supports: Vec<String>,
}

/// Gather the deduplicated selectors and group conditions to probe.
pub(crate) fn collect_probe(sheet: &Stylesheet) -> ProbePayload {
    let mut payload = ProbePayload {
        selectors: Vec::new(),
        media_conditions: Vec::new(),
        supports_conditions: Vec::new(),
    };
    let mut seen_selectors = HashSet::new();
    let mut seen_conditions = HashSet::new();
    collect_rules(
        &sheet.rules,
        &mut payload,
        &mut seen_selectors,
        &mut seen_conditions,
    );
    payload
}

fn collect_rules(
    rules: &[CssRule],
    payload: &mut ProbePayload,
    seen_selectors: &mut HashSet<String>,
    seen_conditions: &mut HashSet<(String, String)>,
) {
    for rule in rules {
        match rule {
            CssRule::Style(style) => {
                for selector in &style.selectors {
                    let normalized = normalize_selector(selector);
                    if !normalized.is_empty() && seen_selectors.insert(normalized.clone()) {
                        payload.selectors.push(normalized);
                    }
                }
            }
            CssRule::Group(group) => {
                let name = group.name.to_ascii_lowercase();
                if !group.condition.is_empty()
                    && seen_conditions.insert((name.clone(), group.condition.clone()))
                {
                    match name.as_str() {
                        "media" => payload.media_conditions.push(group.condition.clone()),
                        "supports" => payload.supports_conditions.push(group.condition.clone()),
                        _ => {}
                    }
                }
                collect_rules(&group.rules, payload, seen_selectors, seen_conditions);
            }
            _ => {}
        }
    }
}

/// Reduce the stylesheet to its critical subset.
pub(crate) fn prune(
    sheet: Stylesheet,
    outcome: &ProbeOutcome,
    force_include: &[Pattern],
    max_embedded_base64_length: usize,
) -> Stylesheet {
    let cx = PruneContext {
        critical: outcome.critical_selectors.iter().map(String::as_str).collect(),
        active_media: outcome.active_media.iter().map(String::as_str).collect(),
        active_supports: outcome.active_supports.iter().map(String::as_str).collect(),
        force_include,
    };

    let mut rules = keep_critical(sheet.rules, &cx);

    let mut fonts = HashSet::new();
    let mut animations = HashSet::new();
    collect_referenced_names(&rules, &mut fonts, &mut animations);
    retain_resources(&mut rules, &fonts, &animations, max_embedded_base64_length);

    Stylesheet { rules }
}

struct PruneContext<'a> {
    critical: HashSet<&'a str>,
    active_media: HashSet<&'a str>,
    active_supports: HashSet<&'a str>,
    force_include: &'a [Pattern],
}

impl PruneContext<'_> {
    fn keep_selector(&self, selector: &str) -> bool {
        if self
            .force_include
            .iter()
            .any(|pattern| pattern.matches_exactly(selector))
        {
            return true;
        }
        let normalized = normalize_selector(selector);
        if normalized.is_empty() {
            return true;
        }
        self.critical.contains(normalized.as_str())
    }

    fn group_active(&self, name: &str, condition: &str) -> bool {
        if condition.is_empty() {
            return true;
        }
        match name.to_ascii_lowercase().as_str() {
            "media" => self.active_media.contains(condition),
            "supports" => self.active_supports.contains(condition),
            _ => true,
        }
    }
}

/// First pass: filter style rules by selector and groups by condition.
/// Font faces and keyframes survive to the resource pass; block-less
/// statements never belong in critical output.
fn keep_critical(rules: Vec<CssRule>, cx: &PruneContext<'_>) -> Vec<CssRule> {
    let mut kept = Vec::with_capacity(rules.len());

    for rule in rules {
        match rule {
            CssRule::Style(mut style) => {
                style.selectors.retain(|selector| cx.keep_selector(selector));
                if !style.selectors.is_empty() {
                    kept.push(CssRule::Style(style));
                }
            }
            CssRule::Group(mut group) => {
                if !cx.group_active(&group.name, &group.condition) {
                    continue;
                }
                group.rules = keep_critical(group.rules, cx);
                if !group.rules.is_empty() {
                    kept.push(CssRule::Group(group));
                }
            }
            rule @ (CssRule::Declarations(_) | CssRule::Keyframes(_)) => kept.push(rule),
            CssRule::Statement(_) => {}
        }
    }

    kept
}

/// Second pass: keep only the font faces and keyframes the surviving rules
/// reference, and drop fonts with oversized embedded sources.
fn retain_resources(
    rules: &mut Vec<CssRule>,
    fonts: &HashSet<String>,
    animations: &HashSet<String>,
    max_embedded_base64_length: usize,
) {
    rules.retain_mut(|rule| match rule {
        CssRule::Declarations(decls) if decls.name.eq_ignore_ascii_case("font-face") => {
            if has_oversized_embedded_source(&decls.declarations, max_embedded_base64_length) {
                return false;
            }
            font_face_referenced(&decls.declarations, fonts)
        }
        CssRule::Keyframes(keyframes) => {
            let name = unquote(&keyframes.animation_name).to_lowercase();
            animations.contains(&name)
        }
        CssRule::Group(group) => {
            retain_resources(&mut group.rules, fonts, animations, max_embedded_base64_length);
            !group.rules.is_empty()
        }
        _ => true,
    });
}

fn collect_referenced_names(
    rules: &[CssRule],
    fonts: &mut HashSet<String>,
    animations: &mut HashSet<String>,
) {
    for rule in rules {
        match rule {
            CssRule::Style(style) => {
                for declaration in &style.declarations {
                    let property = declaration.property.to_ascii_lowercase();
                    if property == "font-family" || property == "font" {
                        collect_name_tokens(&declaration.value, fonts);
                    } else if property.ends_with("animation-name")
                        || property.ends_with("animation")
                    {
                        collect_name_tokens(&declaration.value, animations);
                    }
                }
            }
            CssRule::Group(group) => collect_referenced_names(&group.rules, fonts, animations),
            _ => {}
        }
    }
}

/// Tokenize a font or animation value conservatively: every comma segment
/// contributes its words, unquoted and lowercased. Over-collection only
/// keeps an extra resource, never loses one.
fn collect_name_tokens(value: &str, names: &mut HashSet<String>) {
    for segment in value.split(',') {
        for word in segment.split_whitespace() {
            let token = word.trim_matches(|c| c == '"' || c == '\'');
            if !token.is_empty() {
                names.insert(token.to_lowercase());
            }
        }
    }
}

fn font_face_referenced(declarations: &[Declaration], fonts: &HashSet<String>) -> bool {
    for declaration in declarations {
        if declaration.property.eq_ignore_ascii_case("font-family") {
            let mut tokens = HashSet::new();
            collect_name_tokens(&declaration.value, &mut tokens);
            return tokens.iter().any(|token| fonts.contains(token));
        }
    }
    false
}

fn has_oversized_embedded_source(declarations: &[Declaration], max_length: usize) -> bool {
    let mut oversized = false;
    for declaration in declarations {
        if !declaration.property.eq_ignore_ascii_case("src") {
            continue;
        }
        urls::visit_urls(&declaration.value, |reference| {
            if let Some(index) = reference.find("base64,") {
                if reference.len() - (index + "base64,".len()) > max_length {
                    oversized = true;
                }
            }
        });
    }
    oversized
}

/// Strip pseudo-elements and interaction-state pseudo-classes so the base
/// selector can be probed. Structural pseudo-classes (`:root`,
/// `:nth-child`, `:not`) stay since the browser can match them.
pub(crate) fn normalize_selector(selector: &str) -> String {
    let mut out = String::with_capacity(selector.len());
    let len = selector.len();
    let mut i = 0;

    while i < len {
        let rest = &selector[i..];
        let Some(c) = rest.chars().next() else { break };
        match c {
            ':' => {
                let double = rest[1..].starts_with(':');
                let name_start = i + 1 + usize::from(double);
                let name_len = selector[name_start..]
                    .find(|ch: char| !ch.is_ascii_alphanumeric() && ch != '-' && ch != '_')
                    .unwrap_or(len - name_start);
                let name_end = name_start + name_len;
                let mut end = name_end;
                if selector[end..].starts_with('(') {
                    end = skip_balanced(selector, end);
                }
                if !double && !is_unprobeable_pseudo(&selector[name_start..name_end]) {
                    out.push_str(&selector[i..end]);
                }
                i = end;
            }
            '"' | '\'' => {
                let close = selector[i + 1..]
                    .find(c)
                    .map(|p| i + 1 + p + 1)
                    .unwrap_or(len);
                out.push_str(&selector[i..close]);
                i = close;
            }
            _ => {
                out.push(c);
                i += c.len_utf8();
            }
        }
    }

    collapse_whitespace(out.trim())
}

fn skip_balanced(selector: &str, open: usize) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (offset, c) in selector[open..].char_indices() {
        let end = open + offset + c.len_utf8();
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return end;
                    }
                }
                _ => {}
            },
        }
    }

    selector.len()
}

fn is_unprobeable_pseudo(name: &str) -> bool {
    if name.starts_with('-') {
        return true;
    }
    matches!(
        name.to_ascii_lowercase().as_str(),
        "hover"
            | "active"
            | "focus"
            | "focus-within"
            | "focus-visible"
            | "visited"
            | "link"
            | "target"
            | "target-within"
            | "before"
            | "after"
            | "first-line"
            | "first-letter"
            | "selection"
            | "placeholder"
            | "marker"
            | "backdrop"
    )
}

fn unquote(text: &str) -> &str {
    text.trim().trim_matches(|c| c == '"' || c == '\'')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(selectors: &[&str], media: &[&str]) -> ProbeOutcome {
        ProbeOutcome {
            critical_selectors: selectors.iter().map(|s| s.to_string()).collect(),
            active_media: media.iter().map(|s| s.to_string()).collect(),
            active_supports: Vec::new(),
        }
    }

    #[test]
    fn normalizes_interaction_pseudo_classes() {
        assert_eq!(normalize_selector("a:hover"), "a");
        assert_eq!(normalize_selector(".nav li:focus-visible > a"), ".nav li > a");
        assert_eq!(normalize_selector("p::first-line"), "p");
        assert_eq!(normalize_selector("::selection"), "");
        assert_eq!(normalize_selector("input::-webkit-input-placeholder"), "input");
    }

    #[test]
    fn keeps_structural_pseudo_classes() {
        assert_eq!(normalize_selector("li:nth-child(2n+1)"), "li:nth-child(2n+1)");
        assert_eq!(normalize_selector(":root"), ":root");
        assert_eq!(normalize_selector("div:not(.hidden)"), "div:not(.hidden)");
    }

    #[test]
    fn collects_selectors_and_conditions() {
        let sheet = Stylesheet::parse(
            "a:hover{color:red} b{font-weight:bold} \
             @media (max-width: 600px){ .m{display:none} } \
             @supports (display: grid){ .g{display:grid} }",
        );
        let payload = collect_probe(&sheet);
        assert_eq!(payload.selectors, vec!["a", "b", ".m", ".g"]);
        assert_eq!(payload.media_conditions, vec!["(max-width: 600px)"]);
        assert_eq!(payload.supports_conditions, vec!["(display: grid)"]);
    }

    #[test]
    fn prunes_non_critical_selectors() {
        let sheet = Stylesheet::parse(".top{color:red} .bottom{color:blue} .top,.bottom{margin:0}");
        let pruned = prune(sheet, &outcome(&[".top"], &[]), &[], 1000);
        assert_eq!(pruned.to_css_string(), ".top{color:red}.top{margin:0}");
    }

    #[test]
    fn drops_inactive_media_groups() {
        let sheet = Stylesheet::parse(
            "@media (max-width: 600px){ .a{color:red} } @media print{ .a{color:black} }",
        );
        let pruned = prune(sheet, &outcome(&[".a"], &["(max-width: 600px)"]), &[], 1000);
        assert_eq!(
            pruned.to_css_string(),
            "@media (max-width: 600px){.a{color:red}}"
        );
    }

    #[test]
    fn force_include_overrides_probe() {
        let sheet = Stylesheet::parse(".a{color:red} .banner{color:blue} .promo{color:green}");
        let patterns = vec![
            Pattern::parse(".banner").unwrap(),
            Pattern::parse("/^\\.pro/").unwrap(),
        ];
        let pruned = prune(sheet, &outcome(&[], &[]), &patterns, 1000);
        assert_eq!(
            pruned.to_css_string(),
            ".banner{color:blue}.promo{color:green}"
        );
    }

    #[test]
    fn keeps_pseudo_only_selectors() {
        let sheet = Stylesheet::parse("::selection{background:gold} .gone{color:red}");
        let pruned = prune(sheet, &outcome(&[], &[]), &[], 1000);
        assert_eq!(pruned.to_css_string(), "::selection{background:gold}");
    }

    #[test]
    fn retains_only_referenced_resources() {
        let css = "\
            .hero{font-family:\"Open Sans\",sans-serif;animation:pulse 2s infinite} \
            .gone{font-family:Roboto} \
            @font-face{font-family:\"Open Sans\";src:url(open-sans.woff2)} \
            @font-face{font-family:Roboto;src:url(roboto.woff2)} \
            @keyframes pulse{from{opacity:0}to{opacity:1}} \
            @keyframes slide{from{left:0}to{left:100px}}";
        let sheet = Stylesheet::parse(css);
        let pruned = prune(sheet, &outcome(&[".hero"], &[]), &[], 1000);
        let out = pruned.to_css_string();
        assert!(out.contains("@font-face{font-family:\"Open Sans\""));
        assert!(!out.contains("Roboto"));
        assert!(out.contains("@keyframes pulse"));
        assert!(!out.contains("@keyframes slide"));
    }

    #[test]
    fn drops_font_faces_with_oversized_embedded_sources() {
        let embedded = "A".repeat(64);
        let css = format!(
            ".t{{font-family:Tiny}} @font-face{{font-family:Tiny;src:url(data:font/woff2;base64,{embedded})}}"
        );
        let sheet = Stylesheet::parse(&css);

        let kept = prune(sheet.clone(), &outcome(&[".t"], &[]), &[], 64);
        assert!(kept.to_css_string().contains("@font-face"));

        let dropped = prune(sheet, &outcome(&[".t"], &[]), &[], 63);
        assert!(!dropped.to_css_string().contains("@font-face"));
    }

    #[test]
    fn statements_never_survive() {
        let sheet = Stylesheet::parse("@import url(other.css); .a{color:red}");
        let pruned = prune(sheet, &outcome(&[".a"], &[]), &[], 1000);
        assert_eq!(pruned.to_css_string(), ".a{color:red}");
    }
}
