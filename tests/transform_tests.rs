//! Post-processing pipeline tests

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use critical_css::css::{
    CssRule, CustomTransform, PostProcessStep, Rebase, Stylesheet, TransformContext, UrlRewrite,
    apply,
};
use critical_css::errors::CssError;
use critical_css::options::Pattern;

fn context<'a>(client: &'a reqwest::Client, assets: &'a [PathBuf]) -> TransformContext<'a> {
    TransformContext {
        client,
        asset_paths: assets,
        base_url: None,
        fetch_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_empty_pipeline_returns_input_untouched() {
    let client = reqwest::Client::new();
    let css = "a {  color: red }".to_string();
    let out = apply(css.clone(), &[], &context(&client, &[]))
        .await
        .unwrap();
    assert_eq!(out, css);
}

#[tokio::test]
async fn test_discard_drops_matching_rules_and_at_rules() {
    let client = reqwest::Client::new();
    let css = "#revenge{color:red}.keep{color:blue}@font-face{font-family:X;src:url(x.woff)}@media print{.keep{margin:0}}".to_string();
    let steps = [PostProcessStep::Discard(vec![
        Pattern::parse("#revenge").unwrap(),
        Pattern::parse("@font-face").unwrap(),
        Pattern::parse("/^@media print/").unwrap(),
    ])];
    let out = apply(css, &steps, &context(&client, &[])).await.unwrap();
    assert_eq!(out, ".keep{color:blue}");
}

#[tokio::test]
async fn test_rebase_rewrites_relative_references() {
    let client = reqwest::Client::new();
    let css = ".hero{background:url('../images/bg.png')}".to_string();
    let steps = [PostProcessStep::Rebase(Rebase::Paths {
        from: "assets/css/site.css".to_string(),
        to: "index.html".to_string(),
    })];
    let out = apply(css, &steps, &context(&client, &[])).await.unwrap();
    assert_eq!(out, ".hero{background:url('assets/images/bg.png')}");
}

#[tokio::test]
async fn test_rebase_with_callback() {
    let client = reqwest::Client::new();
    let css = ".logo{background:url(logo.svg)}".to_string();
    let steps = [PostProcessStep::Rebase(Rebase::With(UrlRewrite(Arc::new(
        |reference: &str| Some(format!("https://cdn.example.com/{reference}")),
    ))))];
    let out = apply(css, &steps, &context(&client, &[])).await.unwrap();
    assert_eq!(out, ".logo{background:url(https://cdn.example.com/logo.svg)}");
}

#[tokio::test]
async fn test_small_images_inline_and_large_stay_external() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("small.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();
    std::fs::write(dir.path().join("large.png"), vec![0u8; 2048]).unwrap();

    let client = reqwest::Client::new();
    let assets = [dir.path().to_path_buf()];
    let css = ".a{background:url(small.png)}.b{background:url(large.png)}".to_string();
    let steps = [PostProcessStep::InlineImages {
        max_file_size: 1024,
    }];
    let out = apply(css, &steps, &context(&client, &assets)).await.unwrap();

    assert_eq!(
        out,
        ".a{background:url(data:image/png;base64,iVBORw==)}.b{background:url(large.png)}"
    );
}

#[tokio::test]
async fn test_missing_asset_stays_an_external_reference() {
    let dir = tempfile::tempdir().unwrap();
    let client = reqwest::Client::new();
    let assets = [dir.path().to_path_buf()];
    let css = ".a{background:url(absent.png)}".to_string();
    let steps = [PostProcessStep::InlineImages {
        max_file_size: 1024,
    }];
    let out = apply(css, &steps, &context(&client, &assets)).await.unwrap();
    assert_eq!(out, ".a{background:url(absent.png)}");
}

#[tokio::test]
async fn test_custom_step_runs_against_the_parsed_sheet() {
    let client = reqwest::Client::new();
    let steps = [PostProcessStep::Custom(CustomTransform(Arc::new(
        |sheet: &mut Stylesheet| {
            sheet
                .rules
                .retain(|rule| !matches!(rule, CssRule::Statement(_)));
            Ok(())
        },
    )))];
    let out = apply(
        "@import url(x.css);a{color:red}".to_string(),
        &steps,
        &context(&client, &[]),
    )
    .await
    .unwrap();
    assert_eq!(out, "a{color:red}");
}

#[tokio::test]
async fn test_failing_custom_step_aborts_the_pipeline() {
    let client = reqwest::Client::new();
    let steps = [PostProcessStep::Custom(CustomTransform(Arc::new(
        |_: &mut Stylesheet| Err(CssError::Step("refused".to_string())),
    )))];
    let err = apply("a{color:red}".to_string(), &steps, &context(&client, &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, CssError::Step(_)));
}

#[test]
fn test_minify_strips_whitespace() {
    assert_eq!(critical_css::minify("a { color : red ; }"), "a{color:red}");
}
