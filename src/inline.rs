//! Inlining of critical CSS into the source document
//!
//! The critical rules go into a `<style>` block placed before the first
//! stylesheet link (or appended to `<head>` when there is none). Every
//! stylesheet link is then switched to deferred loading via the
//! `media="print"` swap, with a `<noscript>` fallback for script-less
//! clients. Extract mode additionally removes the now-inlined rules from
//! the document's own `<style>` blocks and rewrites locally resolvable
//! stylesheet links to revved copies with those rules taken out.

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use kuchiki::NodeRef;
use kuchiki::traits::TendrilSink;

use crate::css::stylesheet::{CssRule, Stylesheet};
use crate::css::urls;
use crate::options::InlineConfig;

/// Inline `critical_css` into `html` and return the rewritten document.
pub fn inline(html: &str, critical_css: &str, config: &InlineConfig) -> Result<String> {
    let document = kuchiki::parse_html().one(html);

    if config.extract {
        extract_critical_rules(&document, critical_css, &config.base_path)?;
    }

    let css = if config.minify {
        crate::css::minify(critical_css)
    } else {
        critical_css.to_string()
    };

    if !css.trim().is_empty() {
        insert_critical_style(&document, &css)?;
    }

    defer_stylesheet_links(&document)?;

    let mut out = Vec::new();
    document
        .serialize(&mut out)
        .context("failed to serialize document")?;
    String::from_utf8(out).context("serialized document is not valid UTF-8")
}

/// Place the critical style before the first stylesheet link so the
/// deferred sheets keep their override position, or append to head.
fn insert_critical_style(document: &NodeRef, css: &str) -> Result<()> {
    let style = build_fragment_node(&format!("<style>{css}</style>"), "style")?;

    let first_link = document
        .select("link[rel=stylesheet]")
        .map_err(|()| anyhow!("invalid stylesheet selector"))?
        .next();

    match first_link {
        Some(link) => link.as_node().insert_before(style),
        None => {
            let head = document
                .select_first("head")
                .map_err(|()| anyhow!("document has no head element"))?;
            head.as_node().append(style);
        }
    }

    Ok(())
}

fn defer_stylesheet_links(document: &NodeRef) -> Result<()> {
    let links: Vec<_> = document
        .select("link[rel=stylesheet]")
        .map_err(|()| anyhow!("invalid stylesheet selector"))?
        .collect();

    for link in links {
        let mut attributes = link.attributes.borrow_mut();
        let Some(href) = attributes.get("href").map(str::to_string) else {
            continue;
        };
        let already_deferred = attributes
            .get("onload")
            .is_some_and(|value| value.contains("this.media"));
        if already_deferred {
            continue;
        }

        let restored_media = attributes
            .get("media")
            .map(str::trim)
            .filter(|media| !media.is_empty())
            .unwrap_or("all")
            .to_string();
        attributes.insert("media", "print".to_string());
        attributes.insert(
            "onload",
            format!("this.media='{restored_media}';this.onload=null"),
        );
        drop(attributes);

        let fallback = build_fragment_node(
            &format!(
                "<noscript><link rel=\"stylesheet\" href=\"{}\"></noscript>",
                escape_attribute(&href)
            ),
            "noscript",
        )?;
        link.as_node().insert_after(fallback);
    }

    Ok(())
}

/// Remove rules that are now inlined from the document's own stylesheets.
/// Matching is by canonical rule serialization, so formatting differences
/// between a sheet and the critical CSS do not matter.
fn extract_critical_rules(
    document: &NodeRef,
    critical_css: &str,
    base_path: &Path,
) -> Result<()> {
    let critical_keys: HashSet<String> = Stylesheet::parse(critical_css)
        .rules
        .iter()
        .map(CssRule::to_css_string)
        .collect();
    if critical_keys.is_empty() {
        return Ok(());
    }

    strip_style_blocks(document, &critical_keys)?;
    rewrite_linked_stylesheets(document, &critical_keys, base_path)
}

fn strip_style_blocks(document: &NodeRef, critical_keys: &HashSet<String>) -> Result<()> {
    let styles: Vec<_> = document
        .select("style")
        .map_err(|()| anyhow!("invalid style selector"))?
        .collect();

    for style in styles {
        let node = style.as_node();
        let text = node.text_contents();
        if text.trim().is_empty() {
            continue;
        }

        let mut sheet = Stylesheet::parse(&text);
        let before = sheet.rules.len();
        sheet
            .rules
            .retain(|rule| !critical_keys.contains(&rule.to_css_string()));
        if sheet.rules.len() == before {
            continue;
        }

        if sheet.rules.is_empty() {
            node.detach();
        } else {
            let children: Vec<_> = node.children().collect();
            for child in children {
                child.detach();
            }
            node.append(NodeRef::new_text(sheet.to_css_string()));
        }
    }

    Ok(())
}

#[derive(Clone)]
enum LinkOutcome {
    Unchanged,
    Rewritten(String),
    Emptied,
}

/// Point each locally resolvable stylesheet link at a revved copy with the
/// critical rules removed. Links whose file cannot be read are left alone;
/// links whose sheet was entirely critical are dropped.
fn rewrite_linked_stylesheets(
    document: &NodeRef,
    critical_keys: &HashSet<String>,
    base_path: &Path,
) -> Result<()> {
    let links: Vec<_> = document
        .select("link[rel=stylesheet]")
        .map_err(|()| anyhow!("invalid stylesheet selector"))?
        .collect();
    let mut outcomes: HashMap<String, LinkOutcome> = HashMap::new();

    for link in links {
        let Some(href) = link.attributes.borrow().get("href").map(str::to_string) else {
            continue;
        };
        if urls::is_remote_url(&href) || urls::is_data_uri(&href) {
            continue;
        }

        let outcome = match outcomes.entry(href.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let outcome = extract_from_file(&href, critical_keys, base_path)?;
                entry.insert(outcome.clone());
                outcome
            }
        };

        match outcome {
            LinkOutcome::Unchanged => {}
            LinkOutcome::Rewritten(new_href) => {
                link.attributes.borrow_mut().insert("href", new_href);
            }
            LinkOutcome::Emptied => link.as_node().detach(),
        }
    }

    Ok(())
}

fn extract_from_file(
    href: &str,
    critical_keys: &HashSet<String>,
    base_path: &Path,
) -> Result<LinkOutcome> {
    let clean = href.split(['?', '#']).next().unwrap_or(href);
    let path = base_path.join(clean.trim_start_matches('/'));
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            log::debug!("leaving {href} alone, cannot read {}: {e}", path.display());
            return Ok(LinkOutcome::Unchanged);
        }
    };

    let mut sheet = Stylesheet::parse(&text);
    let before = sheet.rules.len();
    sheet
        .rules
        .retain(|rule| !critical_keys.contains(&rule.to_css_string()));
    if sheet.rules.len() == before {
        return Ok(LinkOutcome::Unchanged);
    }
    if sheet.rules.is_empty() {
        return Ok(LinkOutcome::Emptied);
    }

    let reduced = sheet.to_css_string();
    let revved = revved_file_name(&path, &reduced)?;
    let target = path.with_file_name(&revved);
    std::fs::write(&target, &reduced)
        .with_context(|| format!("failed to write extracted stylesheet {}", target.display()))?;
    log::debug!(
        "extracted {} critical rule(s) from {href} into {revved}",
        before - sheet.rules.len()
    );

    Ok(LinkOutcome::Rewritten(replace_file_name(clean, &revved)))
}

fn revved_file_name(path: &Path, contents: &str) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("stylesheet path has no file name: {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or("css");
    let mut hasher = DefaultHasher::new();
    contents.hash(&mut hasher);
    Ok(format!("{stem}.{:016x}.{extension}", hasher.finish()))
}

fn replace_file_name(href: &str, file_name: &str) -> String {
    match href.rfind('/') {
        Some(at) => format!("{}{}", &href[..=at], file_name),
        None => file_name.to_string(),
    }
}

/// Build a detached node by parsing a small fragment and pulling out the
/// wanted element.
fn build_fragment_node(fragment_html: &str, element: &str) -> Result<NodeRef> {
    let fragment = kuchiki::parse_html().one(fragment_html);
    let found = fragment
        .select_first(element)
        .map_err(|()| anyhow!("failed to build {element} node"))?;
    let node = found.as_node().clone();
    node.detach();
    Ok(node)
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(minify: bool, extract: bool) -> InlineConfig {
        InlineConfig {
            base_path: PathBuf::from("."),
            minify,
            extract,
        }
    }

    const PAGE: &str = r#"<!DOCTYPE html><html><head>
        <link rel="stylesheet" href="styles/main.css">
        </head><body><h1>Hi</h1></body></html>"#;

    #[test]
    fn inserts_style_before_first_link_and_defers_it() {
        let out = inline(PAGE, "h1 { color: red }", &config(true, false)).unwrap();

        let style_at = out.find("<style>h1{color:red}</style>").unwrap();
        let link_at = out.find("styles/main.css").unwrap();
        assert!(style_at < link_at);

        assert!(out.contains(r#"media="print""#));
        assert!(out.contains("this.media='all';this.onload=null"));
        assert!(out.contains("<noscript>"));
    }

    #[test]
    fn appends_to_head_without_links() {
        let out = inline(
            "<html><head><title>t</title></head><body></body></html>",
            "body{margin:0}",
            &config(true, false),
        )
        .unwrap();
        assert!(out.contains("<style>body{margin:0}</style>"));
        assert!(!out.contains("noscript"));
    }

    #[test]
    fn preserves_link_media_in_onload() {
        let page = r#"<html><head><link rel="stylesheet" href="a.css" media="screen"></head><body></body></html>"#;
        let out = inline(page, "body{margin:0}", &config(true, false)).unwrap();
        assert!(out.contains("this.media='screen'"));
    }

    #[test]
    fn extract_removes_inlined_rules_from_style_blocks() {
        let page = r#"<html><head>
            <style>h1 { color: red } p { margin: 0 }</style>
            </head><body></body></html>"#;
        let out = inline(page, "h1{color:red}", &config(true, true)).unwrap();

        assert!(out.contains("<style>h1{color:red}</style>"));
        assert!(out.contains("<style>p{margin:0}</style>"));
        let first = out.find("h1{color:red}").unwrap();
        assert!(!out[first + 1..].contains("h1{color:red}"));
    }

    #[test]
    fn extract_drops_fully_critical_style_blocks() {
        let page = "<html><head><style>h1 { color: red }</style></head><body></body></html>";
        let out = inline(page, "h1{color:red}", &config(true, true)).unwrap();
        assert_eq!(out.matches("<style>").count(), 1);
    }

    #[test]
    fn extract_rewrites_linked_stylesheets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("styles")).unwrap();
        std::fs::write(
            dir.path().join("styles/main.css"),
            "h1 { color: red }\np { margin: 0 }",
        )
        .unwrap();

        let page = r#"<html><head><link rel="stylesheet" href="styles/main.css"></head><body></body></html>"#;
        let mut cfg = config(true, true);
        cfg.base_path = dir.path().to_path_buf();
        let out = inline(page, "h1{color:red}", &cfg).unwrap();

        assert!(!out.contains(r#"href="styles/main.css""#));
        let revved = std::fs::read_dir(dir.path().join("styles"))
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .find(|name| name != "main.css")
            .unwrap();
        assert!(out.contains(&revved));
        let reduced = std::fs::read_to_string(dir.path().join("styles").join(&revved)).unwrap();
        assert_eq!(reduced, "p{margin:0}");
        // The original stylesheet on disk stays untouched.
        let original = std::fs::read_to_string(dir.path().join("styles/main.css")).unwrap();
        assert!(original.contains("color: red"));
    }

    #[test]
    fn extract_drops_links_whose_sheet_was_entirely_critical() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("all.css"), "h1 { color: red }").unwrap();

        let page =
            r#"<html><head><link rel="stylesheet" href="all.css"></head><body></body></html>"#;
        let mut cfg = config(true, true);
        cfg.base_path = dir.path().to_path_buf();
        let out = inline(page, "h1{color:red}", &cfg).unwrap();

        assert!(!out.contains("all.css"));
        assert!(out.contains("<style>h1{color:red}</style>"));
    }

    #[test]
    fn skips_already_deferred_links() {
        let page = r#"<html><head><link rel="stylesheet" href="a.css" media="print" onload="this.media='all';this.onload=null"></head><body></body></html>"#;
        let out = inline(page, "body{margin:0}", &config(true, false)).unwrap();
        assert_eq!(out.matches("noscript").count(), 0);
    }
}
