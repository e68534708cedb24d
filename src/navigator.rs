use chromiumoxide::element::Element;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::EkwError;
use crate::identifier::RecordIdentifier;
use crate::section::Section;
use crate::wait::poll_until;

/// Search form inputs in form order: court code, number, check digit.
const FIELD_SELECTORS: [&str; 3] = ["#kodWydzialuInput", "#numerKsiegiWieczystej", "#cyfraKontrolna"];
const FALLBACK_FIELD_SELECTOR: &str = r#"input[type="text"]"#;
const SUBMIT_SELECTORS: [&str; 3] = ["#wyszukaj", r#"button[type="submit"]"#, r#"input[type="submit"]"#];
const CLICKABLE_SELECTOR: &str = r#"button, a, input[type="submit"], input[type="button"]"#;

const CURRENT_CONTENT_LABEL: &str = "Przeglądanie aktualnej treści KW";

/// Elements the search page renders its error messages into.
const ERROR_SELECTORS: [&str; 6] = [
    "#bledy",
    ".bledy",
    ".error",
    ".komunikat",
    ".alert",
    r#"[role="alert"]"#,
];
const NOT_FOUND_MARKERS: [&str; 3] = [
    "nie została odnaleziona",
    "nie istnieje",
    "Nie znaleziono",
];

/// Set on a document right before an action that replaces it. Gone once the
/// browser has loaded the next document.
pub(crate) const STALE_MARK: &str = "__ekwStale";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchOutcome {
    Found,
    Missing,
    Pending,
}

/// What the search form page looks like right now.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FormSnapshot {
    fields_by_id: usize,
    text_inputs: usize,
}

impl FormSnapshot {
    /// The challenge has cleared once the search form is on screen.
    fn form_present(&self) -> bool {
        self.fields_by_id == FIELD_SELECTORS.len() || self.text_inputs >= FIELD_SELECTORS.len()
    }
}

/// What the page looks like after the search was submitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResultsSnapshot {
    /// Still the search form document the click was issued on.
    stale: bool,
    /// Text of every button and link.
    labels: Vec<String>,
    /// Text of the known error-message elements.
    errors: Vec<String>,
}

impl ResultsSnapshot {
    fn outcome(&self) -> SearchOutcome {
        if self.stale {
            return SearchOutcome::Pending;
        }
        if self.labels.iter().any(|l| l.contains(CURRENT_CONTENT_LABEL)) {
            return SearchOutcome::Found;
        }
        let not_found = self
            .errors
            .iter()
            .any(|text| NOT_FOUND_MARKERS.iter().any(|m| text.contains(m)));
        if not_found {
            SearchOutcome::Missing
        } else {
            SearchOutcome::Pending
        }
    }
}

/// Sections whose tab is not among the submit buttons on the page.
fn missing_tabs(values: &[String]) -> Vec<Section> {
    Section::ALL
        .into_iter()
        .filter(|s| {
            let caption = s.tab_caption();
            !values.iter().any(|v| *v == caption)
        })
        .collect()
}

/// Drive a fresh tab from the site's front page to the "current content"
/// view of `id`, with all five section tabs rendered.
pub async fn open_record(page: &Page, id: &RecordIdentifier, config: &Config) -> Result<(), EkwError> {
    info!("Navigating to {}", config.base_url);
    match tokio::time::timeout(config.timeouts.navigation, page.goto(config.base_url.as_str())).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(EkwError::navigation("open site", e)),
        Err(_) => {
            return Err(EkwError::navigation(
                "open site",
                format!("no response within {}s", config.timeouts.navigation.as_secs()),
            ))
        }
    }

    await_challenge(page, config).await?;
    fill_form(page, id).await?;
    submit_search(page).await?;
    await_search_outcome(page, id, config).await?;
    open_current_content(page, config).await?;
    await_section_tabs(page, config).await?;

    info!("Record {} loaded", id);
    Ok(())
}

async fn await_challenge(page: &Page, config: &Config) -> Result<(), EkwError> {
    info!("Waiting for anti-bot challenge to clear...");
    let js = format!(
        r#"(() => ({{
            fieldsById: {ids}.filter(s => document.querySelector(s)).length,
            textInputs: document.querySelectorAll({fallback}).length,
        }}))()"#,
        ids = js_literal(&FIELD_SELECTORS),
        fallback = js_literal(&FALLBACK_FIELD_SELECTOR),
    );
    let js = js.as_str();
    let cleared = poll_until(
        "challenge",
        config.timeouts.challenge,
        config.timeouts.poll_interval,
        || async move { probe::<FormSnapshot>(page, js).await.filter(|f| f.form_present()) },
    )
    .await;

    match cleared {
        Some(_) => {
            info!("Search form detected");
            Ok(())
        }
        None => Err(EkwError::ChallengeTimeout(config.timeouts.challenge.as_secs())),
    }
}

async fn fill_form(page: &Page, id: &RecordIdentifier) -> Result<(), EkwError> {
    let fields = locate_fields(page).await?;
    for (field, value) in fields.iter().zip(id.parts()) {
        field
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(|e| EkwError::navigation("clear form field", e))?;
        field
            .click()
            .await
            .map_err(|e| EkwError::navigation("focus form field", e))?
            .type_str(value)
            .await
            .map_err(|e| EkwError::navigation("fill form field", e))?;
    }
    info!(
        "Form filled: court={} number={} digit={}",
        id.court_code(),
        id.number(),
        id.check_digit()
    );
    Ok(())
}

async fn locate_fields(page: &Page) -> Result<Vec<Element>, EkwError> {
    let mut by_id = Vec::with_capacity(FIELD_SELECTORS.len());
    for selector in FIELD_SELECTORS {
        match page.find_element(selector).await {
            Ok(el) => by_id.push(el),
            Err(_) => break,
        }
    }
    if by_id.len() == FIELD_SELECTORS.len() {
        return Ok(by_id);
    }

    debug!("form ids not found, falling back to text inputs in document order");
    let mut inputs = page
        .find_elements(FALLBACK_FIELD_SELECTOR)
        .await
        .map_err(|e| EkwError::navigation("locate form fields", e))?;
    if inputs.len() < 3 {
        return Err(EkwError::navigation(
            "locate form fields",
            format!("expected 3 text inputs, found {}", inputs.len()),
        ));
    }
    inputs.truncate(3);
    Ok(inputs)
}

async fn submit_search(page: &Page) -> Result<(), EkwError> {
    for selector in SUBMIT_SELECTORS {
        if let Ok(button) = page.find_element(selector).await {
            debug!("search button: {}", selector);
            page.evaluate(format!("window[{}] = true", js_literal(STALE_MARK)))
                .await
                .map_err(|e| EkwError::navigation("mark search form", e))?;
            button
                .click()
                .await
                .map_err(|e| EkwError::navigation("submit search", e))?;
            return Ok(());
        }
    }
    Err(EkwError::navigation("submit search", "no search button on the form"))
}

async fn await_search_outcome(page: &Page, id: &RecordIdentifier, config: &Config) -> Result<(), EkwError> {
    info!("Waiting for search results...");
    let js = format!(
        r#"(() => ({{
            stale: window[{mark}] === true,
            labels: [...document.querySelectorAll({clickable})]
                .map(el => (el.innerText || el.value || '').trim())
                .filter(t => t),
            errors: [...document.querySelectorAll({errors})]
                .map(el => (el.innerText || '').trim())
                .filter(t => t),
        }}))()"#,
        mark = js_literal(STALE_MARK),
        clickable = js_literal(CLICKABLE_SELECTOR),
        errors = js_literal(&ERROR_SELECTORS.join(", ")),
    );
    let js = js.as_str();
    let outcome = poll_until(
        "search results",
        config.timeouts.navigation,
        config.timeouts.poll_interval,
        || async move {
            probe::<ResultsSnapshot>(page, js)
                .await
                .map(|s| s.outcome())
                .filter(|o| *o != SearchOutcome::Pending)
        },
    )
    .await;

    match outcome {
        Some(SearchOutcome::Found) => Ok(()),
        Some(SearchOutcome::Missing) => Err(EkwError::RecordNotFound(id.to_string())),
        _ => Err(EkwError::navigation(
            "search results",
            format!("no result page within {}s", config.timeouts.navigation.as_secs()),
        )),
    }
}

async fn open_current_content(page: &Page, config: &Config) -> Result<(), EkwError> {
    info!("Opening '{}'", CURRENT_CONTENT_LABEL);
    let js = format!(
        r#"(() => {{
            const label = {label};
            for (const el of document.querySelectorAll({clickable})) {{
                if ((el.innerText || el.value || '').includes(label)) {{ el.click(); return true; }}
            }}
            return false;
        }})()"#,
        label = js_literal(&CURRENT_CONTENT_LABEL),
        clickable = js_literal(CLICKABLE_SELECTOR),
    );
    let js = js.as_str();
    let clicked = poll_until(
        "current content button",
        config.timeouts.navigation,
        config.timeouts.poll_interval,
        || async move { probe::<bool>(page, js).await.filter(|c| *c) },
    )
    .await;
    if clicked.is_none() {
        return Err(EkwError::navigation(
            "open current content",
            format!("'{}' not clickable", CURRENT_CONTENT_LABEL),
        ));
    }
    Ok(())
}

async fn await_section_tabs(page: &Page, config: &Config) -> Result<(), EkwError> {
    let js = r#"[...document.querySelectorAll('input[type="submit"]')].map(el => el.value)"#;
    let ready = poll_until(
        "section tabs",
        config.timeouts.navigation,
        config.timeouts.poll_interval,
        || async move {
            probe::<Vec<String>>(page, js)
                .await
                .filter(|values| missing_tabs(values).is_empty())
        },
    )
    .await;
    if ready.is_some() {
        return Ok(());
    }

    let seen = probe::<Vec<String>>(page, js).await.unwrap_or_default();
    let missing: Vec<String> = missing_tabs(&seen).iter().map(|s| s.tab_caption()).collect();
    Err(EkwError::navigation(
        "current content view",
        format!(
            "section tabs not rendered within {}s (missing: {})",
            config.timeouts.navigation.as_secs(),
            missing.join(", ")
        ),
    ))
}

/// Evaluate a JS expression and decode its value.
///
/// `None` covers both "not there yet" and "page is navigating and cannot be
/// evaluated right now"; callers poll until they get a definite answer.
pub(crate) async fn probe<T: DeserializeOwned>(page: &Page, js: &str) -> Option<T> {
    match page.evaluate(js).await {
        Ok(result) => result.into_value().ok(),
        Err(e) => {
            debug!("probe failed: {}", e);
            None
        }
    }
}

/// Render a value as a JS literal for splicing into evaluated scripts.
pub(crate) fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

// ── Tests ──
