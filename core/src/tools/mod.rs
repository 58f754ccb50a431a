//! The tool catalog: a closed set of tags, each with a typed input schema, a
//! risk class and a handler. Dispatch is a total function over the tag;
//! capability enforcement happens here, before any handler side effect.

pub mod attachment;
pub mod browser;
pub mod docs;
pub mod fs;
pub mod proto;
pub mod schema;
pub mod shell;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aidesk_protocol::CapabilitySet;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

pub use browser::BrowserManager;
pub use docs::DocumentRenderer;
pub use docs::HtmlBundleRenderer;
pub use schema::JsonSchema;

use crate::artifacts::ArtifactStore;
use crate::error::Result;
use crate::exec;
use crate::store::FileRecord;
use crate::store::Store;

/// Risk classes; the capability policy grants or withholds whole classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRisk {
    Safe,
    DangerousShell,
    DangerousWrite,
    DangerousBrowser,
    Generator,
    Reader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    FsList,
    FsRead,
    FsWrite,
    ShellRun,
    BrowserStart,
    BrowserNavigate,
    BrowserScreenshot,
    DocPptxCreate,
    DocQuoteDocxCreate,
    DocQuoteXlsxCreate,
    DocInspectionCreate,
    DocInspectionXlsxCreate,
    ProtoGenerate,
    AttachmentRead,
}

impl ToolKind {
    pub const ALL: &'static [ToolKind] = &[
        ToolKind::FsList,
        ToolKind::FsRead,
        ToolKind::FsWrite,
        ToolKind::ShellRun,
        ToolKind::BrowserStart,
        ToolKind::BrowserNavigate,
        ToolKind::BrowserScreenshot,
        ToolKind::DocPptxCreate,
        ToolKind::DocQuoteDocxCreate,
        ToolKind::DocQuoteXlsxCreate,
        ToolKind::DocInspectionCreate,
        ToolKind::DocInspectionXlsxCreate,
        ToolKind::ProtoGenerate,
        ToolKind::AttachmentRead,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::FsList => "fs_list",
            ToolKind::FsRead => "fs_read",
            ToolKind::FsWrite => "fs_write",
            ToolKind::ShellRun => "shell_run",
            ToolKind::BrowserStart => "browser_start",
            ToolKind::BrowserNavigate => "browser_navigate",
            ToolKind::BrowserScreenshot => "browser_screenshot",
            ToolKind::DocPptxCreate => "doc_pptx_create",
            ToolKind::DocQuoteDocxCreate => "doc_quote_docx_create",
            ToolKind::DocQuoteXlsxCreate => "doc_quote_xlsx_create",
            ToolKind::DocInspectionCreate => "doc_inspection_create",
            ToolKind::DocInspectionXlsxCreate => "doc_inspection_xlsx_create",
            ToolKind::ProtoGenerate => "proto_generate",
            ToolKind::AttachmentRead => "attachment_read",
        }
    }

    pub fn from_name(name: &str) -> Option<ToolKind> {
        ToolKind::ALL.iter().copied().find(|k| k.name() == name)
    }

    pub fn risk(&self) -> ToolRisk {
        match self {
            ToolKind::FsList | ToolKind::FsRead | ToolKind::AttachmentRead => ToolRisk::Reader,
            ToolKind::FsWrite => ToolRisk::DangerousWrite,
            ToolKind::ShellRun => ToolRisk::DangerousShell,
            ToolKind::BrowserStart | ToolKind::BrowserNavigate | ToolKind::BrowserScreenshot => {
                ToolRisk::DangerousBrowser
            }
            ToolKind::DocPptxCreate
            | ToolKind::DocQuoteDocxCreate
            | ToolKind::DocQuoteXlsxCreate
            | ToolKind::DocInspectionCreate
            | ToolKind::DocInspectionXlsxCreate
            | ToolKind::ProtoGenerate => ToolRisk::Generator,
        }
    }

    /// Built-in handler timeout. `shell_run` additionally enforces its own
    /// per-call `timeout_ms`, clamped to ten minutes.
    pub fn timeout(&self) -> Duration {
        match self {
            ToolKind::ShellRun => Duration::from_millis(exec::MAX_TIMEOUT_MS + 5_000),
            ToolKind::BrowserScreenshot | ToolKind::ProtoGenerate => Duration::from_secs(60),
            ToolKind::BrowserStart | ToolKind::BrowserNavigate => Duration::from_secs(30),
            ToolKind::DocPptxCreate
            | ToolKind::DocQuoteDocxCreate
            | ToolKind::DocQuoteXlsxCreate
            | ToolKind::DocInspectionCreate
            | ToolKind::DocInspectionXlsxCreate => Duration::from_secs(30),
            ToolKind::FsList | ToolKind::FsRead | ToolKind::FsWrite | ToolKind::AttachmentRead => {
                Duration::from_secs(10)
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::FsList => "List files under a workspace-relative path as a tree",
            ToolKind::FsRead => "Read a UTF-8 file from the workspace",
            ToolKind::FsWrite => "Write or append a file inside the workspace",
            ToolKind::ShellRun => "Run a shell command with the workspace as working directory",
            ToolKind::BrowserStart => "Start a headless browser session for this conversation",
            ToolKind::BrowserNavigate => "Point the session browser at a URL",
            ToolKind::BrowserScreenshot => "Screenshot the current page into an attachment",
            ToolKind::DocPptxCreate => "Generate a slide deck document from a structured outline",
            ToolKind::DocQuoteDocxCreate => "Generate a quotation document",
            ToolKind::DocQuoteXlsxCreate => "Generate a quotation spreadsheet",
            ToolKind::DocInspectionCreate => "Generate an inspection report document",
            ToolKind::DocInspectionXlsxCreate => "Generate an inspection report spreadsheet",
            ToolKind::ProtoGenerate => "Generate a clickable HTML prototype bundle",
            ToolKind::AttachmentRead => "Read a previously produced attachment by file id",
        }
    }

    pub fn schema(&self) -> JsonSchema {
        match self {
            ToolKind::FsList => object(
                [
                    ("path", string("Workspace-relative directory, defaults to the root")),
                    ("depth", number("Recursion depth, at most 5")),
                    ("max_entries", number("Entry cap, at most 5000")),
                ],
                &[],
            ),
            ToolKind::FsRead => object([("path", string("Workspace-relative file path"))], &["path"]),
            ToolKind::FsWrite => object(
                [
                    ("path", string("Workspace-relative file path")),
                    ("content", string("UTF-8 content to write")),
                    ("mode", string("`overwrite` (default) or `append`")),
                ],
                &["path", "content"],
            ),
            ToolKind::ShellRun => object(
                [
                    ("command", string("Command line passed to the host shell")),
                    ("timeout_ms", number("Timeout in milliseconds, at most 600000")),
                ],
                &["command"],
            ),
            ToolKind::BrowserStart => object([], &[]),
            ToolKind::BrowserNavigate => {
                object([("url", string("http(s) URL to open"))], &["url"])
            }
            ToolKind::BrowserScreenshot => object([], &[]),
            ToolKind::DocPptxCreate => object(
                [
                    ("title", string("Deck title")),
                    (
                        "slides",
                        array(object(
                            [
                                ("title", string("Slide title")),
                                ("bullets", array(string("Bullet line"))),
                            ],
                            &["title"],
                        )),
                    ),
                ],
                &["title", "slides"],
            ),
            ToolKind::DocQuoteDocxCreate | ToolKind::DocQuoteXlsxCreate => object(
                [
                    ("seller", string("Selling party")),
                    ("buyer", string("Buying party")),
                    ("currency", string("ISO currency code, e.g. CNY")),
                    (
                        "items",
                        array(object(
                            [
                                ("name", string("Line item name")),
                                ("quantity", number("Quantity")),
                                ("unit_price", number("Unit price")),
                            ],
                            &["name", "quantity", "unit_price"],
                        )),
                    ),
                ],
                &["seller", "buyer", "currency", "items"],
            ),
            ToolKind::DocInspectionCreate | ToolKind::DocInspectionXlsxCreate => object(
                [
                    ("project", string("Inspected project name")),
                    (
                        "items",
                        array(object(
                            [
                                ("name", string("Checked item")),
                                ("status", string("pass / fail / pending")),
                                ("note", string("Free-form note")),
                            ],
                            &["name", "status"],
                        )),
                    ),
                ],
                &["project", "items"],
            ),
            ToolKind::ProtoGenerate => object(
                [
                    ("project_name", string("Prototype name")),
                    (
                        "pages",
                        array(object(
                            [
                                ("name", string("Page name")),
                                ("description", string("What the page shows")),
                                ("html", string("Optional page body HTML")),
                            ],
                            &["name"],
                        )),
                    ),
                ],
                &["project_name", "pages"],
            ),
            ToolKind::AttachmentRead => object(
                [("file_id", string("Attachment id from a prior tool result"))],
                &["file_id"],
            ),
        }
    }
}

/// Per-call context handed to every handler.
#[derive(Clone)]
pub struct ToolCtx {
    pub team_id: i64,
    pub project_id: Option<i64>,
    pub session_id: String,
    pub workspace_root: PathBuf,
    pub capabilities: CapabilitySet,
    pub limits: ToolLimits,
    pub artifacts: ArtifactStore,
    pub store: Store,
    pub browser: Arc<BrowserManager>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolLimits {
    pub max_tool_output_chars: usize,
    pub max_file_read_chars: usize,
}

/// Tool result plus any artifacts it registered; the agent loop turns the
/// latter into `task_artifact` events and attachment links.
#[derive(Debug)]
pub struct ToolOutcome {
    pub result: JsonValue,
    pub artifacts: Vec<FileRecord>,
}

impl ToolOutcome {
    pub fn result(result: JsonValue) -> Self {
        Self {
            result,
            artifacts: Vec::new(),
        }
    }
}

/// Whether the effective capability set permits this tool at all.
pub fn permitted(kind: ToolKind, capabilities: CapabilitySet) -> bool {
    match kind.risk() {
        ToolRisk::Safe | ToolRisk::Reader | ToolRisk::Generator => true,
        ToolRisk::DangerousShell => capabilities.shell,
        ToolRisk::DangerousWrite => capabilities.write,
        ToolRisk::DangerousBrowser => capabilities.browser,
    }
}

/// Total dispatch over the tag. Capability enforcement happens in the agent
/// loop *before* this is called; handlers assume they are allowed to run.
pub async fn dispatch(kind: ToolKind, args: &JsonValue, ctx: &ToolCtx) -> Result<ToolOutcome> {
    match kind {
        ToolKind::FsList => fs::list(args, ctx).await,
        ToolKind::FsRead => fs::read(args, ctx).await,
        ToolKind::FsWrite => fs::write(args, ctx).await,
        ToolKind::ShellRun => shell::run(args, ctx).await,
        ToolKind::BrowserStart => browser::start(args, ctx).await,
        ToolKind::BrowserNavigate => browser::navigate(args, ctx).await,
        ToolKind::BrowserScreenshot => browser::screenshot(args, ctx).await,
        ToolKind::DocPptxCreate
        | ToolKind::DocQuoteDocxCreate
        | ToolKind::DocQuoteXlsxCreate
        | ToolKind::DocInspectionCreate
        | ToolKind::DocInspectionXlsxCreate => docs::create(kind, args, ctx).await,
        ToolKind::ProtoGenerate => proto::generate(args, ctx).await,
        ToolKind::AttachmentRead => attachment::read(args, ctx).await,
    }
}

/// Function descriptors for the provider request, in catalog order.
pub fn function_descriptors() -> Vec<JsonValue> {
    ToolKind::ALL
        .iter()
        .map(|kind| schema::function_descriptor(kind.name(), kind.description(), &kind.schema()))
        .collect()
}

fn string(description: &str) -> JsonSchema {
    JsonSchema::String {
        description: Some(description.to_string()),
    }
}

fn number(description: &str) -> JsonSchema {
    JsonSchema::Number {
        description: Some(description.to_string()),
    }
}

fn array(items: JsonSchema) -> JsonSchema {
    JsonSchema::Array {
        items: Box::new(items),
        description: None,
    }
}

fn object<const N: usize>(
    properties: [(&str, JsonSchema); N],
    required: &[&str],
) -> JsonSchema {
    let properties: BTreeMap<String, JsonSchema> = properties
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    JsonSchema::Object {
        properties,
        required: if required.is_empty() {
            None
        } else {
            Some(required.iter().map(|s| s.to_string()).collect())
        },
        additional_properties: Some(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(*kind));
        }
        assert_eq!(ToolKind::from_name("no_such_tool"), None);
    }

    #[test]
    fn capability_gating_by_risk_class() {
        let none = CapabilitySet::none();
        assert!(permitted(ToolKind::FsList, none));
        assert!(permitted(ToolKind::AttachmentRead, none));
        // Generators stay available even with an empty capability set.
        assert!(permitted(ToolKind::DocQuoteXlsxCreate, none));
        assert!(permitted(ToolKind::ProtoGenerate, none));
        assert!(!permitted(ToolKind::FsWrite, none));
        assert!(!permitted(ToolKind::ShellRun, none));
        assert!(!permitted(ToolKind::BrowserScreenshot, none));

        let write_only = CapabilitySet {
            write: true,
            ..CapabilitySet::none()
        };
        assert!(permitted(ToolKind::FsWrite, write_only));
        assert!(!permitted(ToolKind::ShellRun, write_only));
    }

    #[test]
    fn every_tool_has_a_descriptor() {
        let descriptors = function_descriptors();
        assert_eq!(descriptors.len(), ToolKind::ALL.len());
        for descriptor in &descriptors {
            assert_eq!(descriptor["type"], "function");
            assert!(descriptor["function"]["name"].is_string());
        }
    }
}
