//! Fragment merging and dedupe behavior

use critical_css::{combine, dedupe};

#[test]
fn test_single_fragment_passes_through_verbatim() {
    let fragment = "a {  color : red ; }\n\n/* untouched */".to_string();
    assert_eq!(combine(std::slice::from_ref(&fragment)), fragment);
}

#[test]
fn test_no_fragments_yield_empty_css() {
    assert_eq!(combine(&[]), "");
}

#[test]
fn test_shared_rules_appear_once() {
    let a = "a{color:red}.nav{display:flex}".to_string();
    let b = "a{color:red}.hero{height:100vh}".to_string();
    assert_eq!(
        combine(&[a, b]),
        ".nav{display:flex}a{color:red}.hero{height:100vh}"
    );
}

#[test]
fn test_merging_a_fragment_with_itself_is_identity() {
    let fragment = "a{color:red}p{margin:0}".to_string();
    assert_eq!(combine(&[fragment.clone(), fragment.clone()]), fragment);
}

#[test]
fn test_duplicate_keeps_its_last_position() {
    // The repeated rule must land where the later fragment put it, so rules
    // from wider viewports keep their override position in the cascade.
    let a = "p{color:blue}".to_string();
    let b = ".x{color:green}p{color:blue}".to_string();
    assert_eq!(combine(&[a, b]), ".x{color:green}p{color:blue}");
}

#[test]
fn test_adjacent_media_blocks_merge() {
    let a = "@media (min-width: 600px){a{color:red}}".to_string();
    let b = "@media (min-width: 600px){p{margin:0}}".to_string();
    assert_eq!(
        combine(&[a, b]),
        "@media (min-width: 600px){a{color:red}p{margin:0}}"
    );
}

#[test]
fn test_non_adjacent_media_blocks_stay_separate() {
    let a = "@media print{a{color:black}}.spacer{height:10px}".to_string();
    let b = "@media print{p{margin:0}}".to_string();
    assert_eq!(
        combine(&[a, b]),
        "@media print{a{color:black}}.spacer{height:10px}@media print{p{margin:0}}"
    );
}

#[test]
fn test_duplicates_inside_merged_media_blocks_are_removed() {
    let a = "@media print{a{color:black}}".to_string();
    let b = "@media print{a{color:black}p{margin:0}}".to_string();
    assert_eq!(combine(&[a, b]), "@media print{a{color:black}p{margin:0}}");
}

#[test]
fn test_duplicate_font_face_and_empty_rules_removed() {
    let a = "@font-face{font-family:\"Open Sans\";src:url(a.woff2)}.empty{}".to_string();
    let b = "@font-face{font-family:\"Open Sans\";src:url(a.woff2)}".to_string();
    assert_eq!(
        combine(&[a, b]),
        "@font-face{font-family:\"Open Sans\";src:url(a.woff2)}"
    );
}

#[test]
fn test_dedupe_cleans_a_single_stylesheet() {
    assert_eq!(
        dedupe("a{color:red} a{color:red} @media print{}"),
        "a{color:red}"
    );
}
