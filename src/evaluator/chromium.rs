//! Headless Chromium implementation of [`Evaluator`]
//!
//! Each request gets a fresh page: viewport and header overrides go in
//! before navigation, the probe script runs after the page settles, and the
//! pruned stylesheet comes back out. The whole request runs under one
//! timeout budget.

use std::future::Future;
use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetScriptExecutionDisabledParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};

use super::browser::{self, BrowserHandle, BrowserLaunchConfig};
use super::js::CRITICAL_PROBE_SCRIPT;
use super::prune;
use super::{EvaluateRequest, Evaluator};
use crate::css::stylesheet::Stylesheet;
use crate::errors::EvaluateError;

/// Evaluator backed by one headless Chromium process. Cheap to share by
/// reference; concurrent requests each open their own page.
pub struct ChromiumEvaluator {
    handle: BrowserHandle,
}

impl ChromiumEvaluator {
    pub async fn launch() -> Result<Self, EvaluateError> {
        Self::launch_with(&BrowserLaunchConfig::default()).await
    }

    pub async fn launch_with(config: &BrowserLaunchConfig) -> Result<Self, EvaluateError> {
        let handle = browser::launch(config).await?;
        Ok(Self { handle })
    }

    /// Close the browser process. Dropping without calling this leaks the
    /// chromium process until the handler task notices.
    pub async fn shutdown(self) {
        self.handle.close().await;
    }

    async fn evaluate_once(&self, request: EvaluateRequest) -> Result<String, EvaluateError> {
        let page = self
            .handle
            .browser()
            .new_page("about:blank")
            .await
            .map_err(|e| EvaluateError::Launch(format!("failed to open page: {e}")))?;

        let result = run_probe(&page, &request).await;

        if let Err(e) = page.close().await {
            log::debug!("failed to close page: {e}");
        }

        result
    }
}

impl Evaluator for ChromiumEvaluator {
    fn evaluate(
        &self,
        request: EvaluateRequest,
    ) -> impl Future<Output = Result<String, EvaluateError>> + Send {
        async move {
            let timeout = request.timeout;
            with_timeout(self.evaluate_once(request), timeout).await
        }
    }
}

async fn with_timeout<T, F>(operation: F, timeout: Duration) -> Result<T, EvaluateError>
where
    F: Future<Output = Result<T, EvaluateError>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(EvaluateError::Timeout {
            ms: timeout.as_millis() as u64,
        }),
    }
}

async fn run_probe(page: &Page, request: &EvaluateRequest) -> Result<String, EvaluateError> {
    page.execute(
        SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(request.width))
            .height(i64::from(request.height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(EvaluateError::Launch)?,
    )
    .await
    .map_err(|e| EvaluateError::Script(format!("failed to set viewport: {e}")))?;

    if let Some(user_agent) = &request.user_agent {
        page.execute(SetUserAgentOverrideParams {
            user_agent: user_agent.clone(),
            accept_language: None,
            platform: None,
            user_agent_metadata: None,
        })
        .await
        .map_err(|e| EvaluateError::Script(format!("failed to set user agent: {e}")))?;
    }

    if !request.headers.is_empty() {
        let mut map = serde_json::Map::new();
        for (name, value) in &request.headers {
            map.insert(name.clone(), serde_json::Value::String(value.clone()));
        }
        page.execute(SetExtraHttpHeadersParams {
            headers: Headers::new(serde_json::Value::Object(map)),
        })
        .await
        .map_err(|e| EvaluateError::Script(format!("failed to set headers: {e}")))?;
    }

    if request.block_js {
        page.execute(SetScriptExecutionDisabledParams { value: true })
            .await
            .map_err(|e| EvaluateError::Script(format!("failed to disable scripts: {e}")))?;
    }

    page.goto(request.url.as_str())
        .await
        .map_err(|e| EvaluateError::Navigation {
            url: request.url.clone(),
            message: e.to_string(),
        })?;
    page.wait_for_navigation()
        .await
        .map_err(|e| EvaluateError::Navigation {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

    if !request.render_wait.is_zero() {
        tokio::time::sleep(request.render_wait).await;
    }

    let sheet = Stylesheet::parse_checked(&request.css)?;
    let payload = prune::collect_probe(&sheet);
    let payload_json = serde_json::to_string(&payload)
        .map_err(|e| EvaluateError::Script(format!("failed to encode probe payload: {e}")))?;
    let expression = format!("({CRITICAL_PROBE_SCRIPT})({payload_json})");

    let evaluation = page
        .evaluate(expression)
        .await
        .map_err(|e| EvaluateError::Script(format!("critical probe failed: {e}")))?;
    let value: serde_json::Value = evaluation
        .into_value()
        .map_err(|e| EvaluateError::Script(format!("critical probe returned no result: {e}")))?;
    let outcome: prune::ProbeOutcome = serde_json::from_value(value)
        .map_err(|e| EvaluateError::Script(format!("malformed probe result: {e}")))?;

    let critical = prune::prune(
        sheet,
        &outcome,
        &request.force_include,
        request.max_embedded_base64_length,
    );
    Ok(critical.to_css_string())
}
