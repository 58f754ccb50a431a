//! Document generator tools. The binary encoders (real PPTX/DOCX/XLSX
//! writers) are collaborators behind the [`DocumentRenderer`] trait; the
//! built-in renderer produces self-contained HTML and CSV bundles so the
//! tools work end-to-end without them. Every rendered document becomes an
//! attachment through the artifact store.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;

use super::ToolCtx;
use super::ToolKind;
use super::ToolOutcome;
use crate::artifacts::ArtifactSource;
use crate::artifacts::NewArtifact;
use crate::error::CoreErr;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slide {
    pub title: String,
    #[serde(default)]
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PptxPayload {
    pub title: String,
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteItem {
    pub name: String,
    pub quantity: f64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotePayload {
    pub seller: String,
    pub buyer: String,
    pub currency: String,
    pub items: Vec<QuoteItem>,
}

impl QuotePayload {
    pub fn total(&self) -> f64 {
        self.items.iter().map(|i| i.quantity * i.unit_price).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionItem {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionPayload {
    pub project: String,
    pub items: Vec<InspectionItem>,
}

/// Closed set of documents the system can produce.
#[derive(Debug, Clone)]
pub enum DocumentSpec {
    Pptx(PptxPayload),
    QuoteDocx(QuotePayload),
    QuoteXlsx(QuotePayload),
    Inspection(InspectionPayload),
    InspectionXlsx(InspectionPayload),
}

impl DocumentSpec {
    pub fn parse(kind: ToolKind, args: &JsonValue) -> Result<Self> {
        let spec = match kind {
            ToolKind::DocPptxCreate => DocumentSpec::Pptx(super::fs::parse(args)?),
            ToolKind::DocQuoteDocxCreate => DocumentSpec::QuoteDocx(super::fs::parse(args)?),
            ToolKind::DocQuoteXlsxCreate => DocumentSpec::QuoteXlsx(super::fs::parse(args)?),
            ToolKind::DocInspectionCreate => DocumentSpec::Inspection(super::fs::parse(args)?),
            ToolKind::DocInspectionXlsxCreate => {
                DocumentSpec::InspectionXlsx(super::fs::parse(args)?)
            }
            other => {
                return Err(CoreErr::ToolFailure(format!(
                    "{} is not a document generator",
                    other.name()
                )));
            }
        };
        Ok(spec)
    }
}

#[derive(Debug)]
pub struct RenderedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Collaborator seam for document encoding. Implementations must be pure:
/// bytes in memory only, no filesystem side effects.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, spec: &DocumentSpec) -> Result<RenderedDocument>;
}

/// Built-in renderer: HTML for page-like documents, CSV for sheet-like ones.
#[derive(Default)]
pub struct HtmlBundleRenderer;

impl DocumentRenderer for HtmlBundleRenderer {
    fn render(&self, spec: &DocumentSpec) -> Result<RenderedDocument> {
        let rendered = match spec {
            DocumentSpec::Pptx(deck) => RenderedDocument {
                filename: format!("{}.html", slug(&deck.title)),
                bytes: render_deck(deck).into_bytes(),
            },
            DocumentSpec::QuoteDocx(quote) => RenderedDocument {
                filename: format!("{}-quote.html", slug(&quote.buyer)),
                bytes: render_quote_html(quote).into_bytes(),
            },
            DocumentSpec::QuoteXlsx(quote) => RenderedDocument {
                filename: format!("{}-quote.csv", slug(&quote.buyer)),
                bytes: render_quote_csv(quote).into_bytes(),
            },
            DocumentSpec::Inspection(report) => RenderedDocument {
                filename: format!("{}-inspection.html", slug(&report.project)),
                bytes: render_inspection_html(report).into_bytes(),
            },
            DocumentSpec::InspectionXlsx(report) => RenderedDocument {
                filename: format!("{}-inspection.csv", slug(&report.project)),
                bytes: render_inspection_csv(report).into_bytes(),
            },
        };
        Ok(rendered)
    }
}

pub async fn create(kind: ToolKind, args: &JsonValue, ctx: &ToolCtx) -> Result<ToolOutcome> {
    let spec = DocumentSpec::parse(kind, args)?;
    let rendered = ctx.renderer.render(&spec)?;
    let record = ctx
        .artifacts
        .register(NewArtifact {
            kind: "generated".to_string(),
            filename: rendered.filename,
            source: ArtifactSource::Bytes(rendered.bytes),
            team_id: ctx.team_id,
            project_id: ctx.project_id,
            session_id: Some(ctx.session_id.clone()),
        })
        .await?;

    let url = ctx.artifacts.download_url(&record);
    Ok(ToolOutcome {
        result: json!({
            "file_id": record.file_id,
            "filename": record.filename,
            "url": url,
        }),
        artifacts: vec![record],
    })
}

fn slug(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.to_string()
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn render_deck(deck: &PptxPayload) -> String {
    let mut body = String::new();
    for slide in &deck.slides {
        body.push_str(&format!("<section><h2>{}</h2><ul>", escape(&slide.title)));
        for bullet in &slide.bullets {
            body.push_str(&format!("<li>{}</li>", escape(bullet)));
        }
        body.push_str("</ul></section>\n");
    }
    page(&deck.title, &body)
}

fn render_quote_html(quote: &QuotePayload) -> String {
    let mut rows = String::new();
    for item in &quote.items {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td></tr>",
            escape(&item.name),
            item.quantity,
            item.unit_price,
            item.quantity * item.unit_price,
        ));
    }
    let body = format!(
        "<p>Seller: {}</p><p>Buyer: {}</p>\
         <table><tr><th>Item</th><th>Qty</th><th>Unit</th><th>Amount</th></tr>{rows}</table>\
         <p>Total: {:.2} {}</p>",
        escape(&quote.seller),
        escape(&quote.buyer),
        quote.total(),
        escape(&quote.currency),
    );
    page("Quotation", &body)
}

fn render_quote_csv(quote: &QuotePayload) -> String {
    let mut out = String::from("item,quantity,unit_price,amount,currency\n");
    for item in &quote.items {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            csv_field(&item.name),
            item.quantity,
            item.unit_price,
            item.quantity * item.unit_price,
            quote.currency,
        ));
    }
    out.push_str(&format!("total,,,{},{}\n", quote.total(), quote.currency));
    out
}

fn render_inspection_html(report: &InspectionPayload) -> String {
    let mut rows = String::new();
    for item in &report.items {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&item.name),
            escape(&item.status),
            escape(item.note.as_deref().unwrap_or("")),
        ));
    }
    let body = format!(
        "<table><tr><th>Item</th><th>Status</th><th>Note</th></tr>{rows}</table>"
    );
    page(&format!("Inspection: {}", report.project), &body)
}

fn render_inspection_csv(report: &InspectionPayload) -> String {
    let mut out = String::from("item,status,note\n");
    for item in &report.items {
        out.push_str(&format!(
            "{},{},{}\n",
            csv_field(&item.name),
            csv_field(&item.status),
            csv_field(item.note.as_deref().unwrap_or("")),
        ));
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>{}</title>\
         <style>body{{font-family:sans-serif;max-width:60rem;margin:2rem auto}}\
         table{{border-collapse:collapse}}td,th{{border:1px solid #ccc;padding:.4rem .8rem}}\
         section{{border-bottom:1px solid #eee;padding:1rem 0}}</style>\
         </head><body><h1>{}</h1>\n{}\n</body></html>\n",
        escape(title),
        escape(title),
        body,
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use serde_json::json;

    use super::*;
    use crate::test_support::tool_ctx_fixture;

    #[test]
    fn quote_total_sums_line_items() {
        let quote = QuotePayload {
            seller: "Acme".into(),
            buyer: "Globex".into(),
            currency: "CNY".into(),
            items: vec![
                QuoteItem {
                    name: "x".into(),
                    quantity: 2.0,
                    unit_price: 10.0,
                },
                QuoteItem {
                    name: "y".into(),
                    quantity: 1.0,
                    unit_price: 5.5,
                },
            ],
        };
        assert!((quote.total() - 25.5).abs() < f64::EPSILON);
    }

    #[test]
    fn csv_renderer_quotes_awkward_fields() {
        let report = InspectionPayload {
            project: "Alpha".into(),
            items: vec![InspectionItem {
                name: "door, front".into(),
                status: "pass".into(),
                note: Some("said \"fine\"".into()),
            }],
        };
        let csv = render_inspection_csv(&report);
        assert!(csv.contains("\"door, front\""));
        assert!(csv.contains("\"said \"\"fine\"\"\""));
    }

    #[tokio::test]
    async fn quote_xlsx_tool_registers_an_attachment() {
        let (fixture, ctx) = tool_ctx_fixture().await;
        let args = json!({
            "seller": "Acme",
            "buyer": "Globex",
            "currency": "CNY",
            "items": [{ "name": "x", "quantity": 2, "unit_price": 10 }],
        });
        let out = create(ToolKind::DocQuoteXlsxCreate, &args, &ctx).await.unwrap();
        assert_eq!(out.artifacts.len(), 1);
        let record = &out.artifacts[0];
        assert!(record.file_id.ends_with(".csv"));
        assert!(out.result["url"].as_str().unwrap().contains(&record.file_id));

        let stored = fixture.store.get_file(&record.file_id).await.unwrap().unwrap();
        assert_eq!(stored.kind, "generated");
        let bytes = std::fs::read(fixture.artifacts.root().join(&record.file_id)).unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("total,,,20,CNY"));
    }

    #[test]
    fn deck_html_escapes_content() {
        let deck = PptxPayload {
            title: "<Alpha>".into(),
            slides: vec![Slide {
                title: "One".into(),
                bullets: vec!["a & b".into()],
            }],
        };
        let html = render_deck(&deck);
        assert!(html.contains("&lt;Alpha&gt;"));
        assert!(html.contains("a &amp; b"));
    }
}
