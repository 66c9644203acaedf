//! Merging of per-viewport critical CSS fragments
//!
//! Fragments arrive ordered smallest viewport first and later fragments must
//! stay able to override earlier ones, so only order-preserving cleanups are
//! applied: exact duplicate removal (keeping the last occurrence), merging of
//! adjacent identical group conditions and dropping of empty rules.

use std::collections::HashSet;

use super::stylesheet::{CssRule, Stylesheet};

/// Combine per-viewport fragments into one deduplicated stylesheet.
///
/// A single fragment is returned verbatim; its internal duplicates are its
/// own and removing them is not this function's call to make.
#[must_use]
pub fn combine(fragments: &[String]) -> String {
    match fragments {
        [] => String::new(),
        [only] => only.clone(),
        many => {
            let joined = many.join(" ");
            dedupe(&joined)
        }
    }
}

/// Re-parse combined CSS and apply the order-preserving cleanups.
#[must_use]
pub fn dedupe(css: &str) -> String {
    let mut sheet = Stylesheet::parse(css);
    merge_adjacent_groups(&mut sheet.rules);
    dedupe_rules(&mut sheet.rules);
    remove_empty(&mut sheet.rules);
    sheet.to_css_string()
}

/// Merge neighboring group rules with identical name and condition. Only
/// adjacent groups are merged; moving a block across other rules could
/// change the cascade.
fn merge_adjacent_groups(rules: &mut Vec<CssRule>) {
    let mut merged: Vec<CssRule> = Vec::with_capacity(rules.len());

    for mut rule in rules.drain(..) {
        if let CssRule::Group(ref mut group) = rule {
            merge_adjacent_groups(&mut group.rules);

            if let Some(CssRule::Group(previous)) = merged.last_mut() {
                if previous.name == group.name && previous.condition == group.condition {
                    previous.rules.append(&mut group.rules);
                    continue;
                }
            }
        }
        merged.push(rule);
    }

    *rules = merged;
}

/// Remove exact duplicate rules, keeping the last occurrence so later
/// fragments keep their override position.
fn dedupe_rules(rules: &mut Vec<CssRule>) {
    for rule in rules.iter_mut() {
        if let CssRule::Group(group) = rule {
            dedupe_rules(&mut group.rules);
        }
    }

    let mut seen = HashSet::new();
    let mut kept: Vec<CssRule> = Vec::with_capacity(rules.len());

    for rule in rules.drain(..).rev() {
        if seen.insert(rule.to_css_string()) {
            kept.push(rule);
        }
    }

    kept.reverse();
    *rules = kept;
}

fn remove_empty(rules: &mut Vec<CssRule>) {
    rules.retain_mut(|rule| match rule {
        CssRule::Style(style) => !style.declarations.is_empty(),
        CssRule::Group(group) => {
            remove_empty(&mut group.rules);
            !group.rules.is_empty()
        }
        CssRule::Declarations(decls) => !decls.declarations.is_empty(),
        CssRule::Keyframes(keyframes) => !keyframes.body.is_empty(),
        CssRule::Statement(_) => true,
    });
}
