use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::Page;
use tracing::info;

use crate::config::Config;
use crate::error::EkwError;
use crate::navigator::{js_literal, probe, STALE_MARK};
use crate::section::{Section, SectionDocument};
use crate::wait::poll_until;

/// A4 in inches, the unit printToPDF expects.
const PAPER_WIDTH_IN: f64 = 8.27;
const PAPER_HEIGHT_IN: f64 = 11.69;
const MARGIN_IN: f64 = 0.4;

/// Export every section of the record loaded in `page`, in canonical order.
///
/// All or nothing: the first section that fails aborts the whole record.
pub async fn export_sections(page: &Page, config: &Config) -> Result<Vec<SectionDocument>, EkwError> {
    let mut documents = Vec::with_capacity(Section::ALL.len());
    for (idx, section) in Section::ALL.into_iter().enumerate() {
        info!("  [{}/{}] {}", idx + 1, Section::ALL.len(), section.tab_caption());
        activate(page, section, config).await?;
        let bytes = print(page, section, config).await?;
        info!("      captured {} ({} bytes)", section, bytes.len());
        documents.push(SectionDocument { section, bytes });
    }
    Ok(documents)
}

/// Click the section's tab and wait until the submitted page has rendered.
async fn activate(page: &Page, section: Section, config: &Config) -> Result<(), EkwError> {
    let mark = js_literal(STALE_MARK);
    let click_js = format!(
        r#"(() => {{
            const tab = [...document.querySelectorAll('input[type="submit"]')]
                .find(el => el.value === {caption});
            if (!tab) return false;
            window[{mark}] = true;
            tab.click();
            return true;
        }})()"#,
        caption = js_literal(&section.tab_caption()),
        mark = mark,
    );
    let ready_js = format!(
        "window[{mark}] !== true && document.readyState === 'complete'",
        mark = mark,
    );
    let timeouts = &config.timeouts;

    let click_js = click_js.as_str();
    let clicked = poll_until("section tab", timeouts.section, timeouts.poll_interval, || async move {
        probe::<bool>(page, click_js).await.filter(|c| *c)
    })
    .await;
    if clicked.is_none() {
        return Err(EkwError::SectionExportFailure {
            section,
            reason: format!("tab '{}' not found", section.tab_caption()),
        });
    }

    let ready_js = ready_js.as_str();
    let ready = poll_until("section render", timeouts.section, timeouts.poll_interval, || async move {
        probe::<bool>(page, ready_js).await.filter(|r| *r)
    })
    .await;
    if ready.is_none() {
        return Err(EkwError::SectionExportFailure {
            section,
            reason: format!("panel not ready within {}s", timeouts.section.as_secs()),
        });
    }

    tokio::time::sleep(timeouts.settle).await;
    Ok(())
}

/// Print the rendered section through Chromium's own PDF backend, so the
/// output keeps a real text layer.
async fn print(page: &Page, section: Section, config: &Config) -> Result<Vec<u8>, EkwError> {
    let params = PrintToPdfParams {
        print_background: Some(true),
        paper_width: Some(PAPER_WIDTH_IN),
        paper_height: Some(PAPER_HEIGHT_IN),
        margin_top: Some(MARGIN_IN),
        margin_bottom: Some(MARGIN_IN),
        margin_left: Some(MARGIN_IN),
        margin_right: Some(MARGIN_IN),
        ..Default::default()
    };

    let bytes = match tokio::time::timeout(config.timeouts.section, page.pdf(params)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            return Err(EkwError::SectionExportFailure {
                section,
                reason: format!("print to PDF: {}", e),
            })
        }
        Err(_) => {
            return Err(EkwError::SectionExportFailure {
                section,
                reason: format!(
                    "print to PDF timed out after {}s",
                    config.timeouts.section.as_secs()
                ),
            })
        }
    };

    check_pdf(section, bytes)
}

fn check_pdf(section: Section, bytes: Vec<u8>) -> Result<Vec<u8>, EkwError> {
    if bytes.starts_with(b"%PDF") {
        Ok(bytes)
    } else {
        Err(EkwError::SectionExportFailure {
            section,
            reason: format!("browser returned {} bytes that are not a PDF", bytes.len()),
        })
    }
}

// ── Tests ──
