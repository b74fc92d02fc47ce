//! Structural content classification.
//!
//! Returns a coarse, MIME-like type label for a write buffer. The key property this
//! module must uphold: a buffer whose first bytes *spoof* a container header (PDF,
//! ELF) but whose internal structure does not validate must never be classified as
//! that container type. A naive prefix check (`buf[0..4] == b"%PDF"`) is exactly the
//! evasion this closes, since ransomware output can be engineered to carry a
//! plausible header. Archive/compressed containers (zip, gzip, ...) have no
//! `ContentLabel` of their own at all — their internal entropy is indistinguishable
//! from encrypted output, so there is nothing to gain from confirming their
//! structure; a spoofed or genuine archive header both fall through to `Unknown`.
//!
//! The classifier delegates magic-byte sniffing to `infer`, then runs a
//! container-specific structural confirmation pass: `object` for ELF executables and
//! shared libraries (a real section/program-header parse), and a minimal
//! trailer/xref check for PDF. Plain text and shell scripts don't have a container
//! format to validate, so they use content heuristics instead (UTF-8 validity /
//! printable-byte ratio, and the literal shebang prefix).

use tracing::{debug, trace};

/// A coarse, MIME-like type label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentLabel {
	Text,
	Pdf,
	Executable,
	SharedLib,
	ShellScript,
	Unknown,
}

impl ContentLabel {
	/// The conventional MIME-like string for this label, as referenced by the
	/// whitelist policy.
	pub fn as_mime(&self) -> &'static str {
		match self {
			Self::Text => "text/plain",
			Self::Pdf => "application/pdf",
			Self::Executable => "application/x-executable",
			Self::SharedLib => "application/x-sharedlib",
			Self::ShellScript => "application/x-shellscript",
			Self::Unknown => "application/octet-stream",
		}
	}
}

/// Ratio of non-printable, non-whitespace bytes above which a buffer is considered
/// binary rather than text.
const BINARY_BYTE_RATIO_THRESHOLD: f64 = 0.30;

/// An opaque handle to the classifier: constructed once at mount init, consulted by
/// the write path, and torn down at shutdown. Our classification logic is backed by
/// reentrant, stateless library calls (`infer`, `object`) and carries no
/// interior mutable state of its own; the handle type exists so the call site can
/// apply the same single-owner / mutex discipline a real non-reentrant classifier
/// library (e.g. libmagic) would require under a multi-threaded FUSE dispatcher,
/// without the rest of the codebase caring which kind of classifier backs it.
///
/// Construction is infallible: unlike a real non-reentrant classifier library, none
/// of the backends this handle wraps acquire a resource (a database handle, a loaded
/// rule set, a file descriptor) that could fail to open. There is no init-failure
/// mode to surface here; a backend that did need one would return `Result` from
/// `new` and have its caller abort the mount on error.
#[derive(Debug, Default)]
pub struct ClassifierHandle;

impl ClassifierHandle {
	/// Initializes the classifier. Called once, during mount initialization.
	pub fn new() -> Self {
		Self
	}

	/// Classifies `buf`. Never fails: an internal classification error degrades to
	/// `ContentLabel::Unknown` rather than propagating.
	pub fn classify(&self, buf: &[u8]) -> ContentLabel {
		classify(buf)
	}
}

pub fn classify(buf: &[u8]) -> ContentLabel {
	if looks_like_shell_script(buf) {
		trace!("classified as shell script");
		return ContentLabel::ShellScript;
	}

	if let Some(kind) = infer::get(buf) {
		trace!(mime = kind.mime_type(), "infer sniffed a type");
		match kind.mime_type() {
			"application/x-executable" | "application/x-sharedlib" | "application/x-elf" => {
				if let Some(label) = classify_elf(buf) {
					return label;
				}
				debug!("ELF magic present but structural parse failed, degrading to unknown");
				return ContentLabel::Unknown;
			}
			"application/pdf" => {
				if is_structurally_valid_pdf(buf) {
					return ContentLabel::Pdf;
				}
				debug!("PDF header present but trailer/xref missing, degrading to unknown");
				return ContentLabel::Unknown;
			}
			// Archive/compressed formats (zip, gzip, ...) are deliberately left
			// unwhitelistable: their internal entropy is indistinguishable from
			// encrypted output, so there is no point validating their structure
			// beyond what `infer` already does.
			_ => {}
		}
	}

	// Fall back: genuine ELF/PDF content that infer's sniffer didn't recognize by
	// magic bytes alone still gets a structural chance, since the whole point of
	// this module is not to rely on prefix bytes.
	if buf.starts_with(b"\x7fELF") {
		if let Some(label) = classify_elf(buf) {
			return label;
		}
		return ContentLabel::Unknown;
	}
	if buf.starts_with(b"%PDF-") {
		return if is_structurally_valid_pdf(buf) {
			ContentLabel::Pdf
		} else {
			ContentLabel::Unknown
		};
	}

	if looks_like_text(buf) {
		return ContentLabel::Text;
	}

	ContentLabel::Unknown
}

fn looks_like_shell_script(buf: &[u8]) -> bool {
	buf.starts_with(b"#!") && looks_like_text(&buf[buf.len().min(2)..])
}

fn classify_elf(buf: &[u8]) -> Option<ContentLabel> {
	use object::read::{Object, ObjectKind};

	let file = object::File::parse(buf).ok()?;
	match file.kind() {
		ObjectKind::Executable => Some(ContentLabel::Executable),
		ObjectKind::Dynamic => Some(ContentLabel::SharedLib),
		_ => None,
	}
}

/// A PDF is a plain-text-framed format with a binary body: a genuine file has a
/// `%PDF-` header, at least one `obj`/`endobj` pair, and a trailer that points back
/// at a cross-reference table via `startxref`. A buffer that merely starts with the
/// five header bytes and is otherwise random will not contain these markers.
fn is_structurally_valid_pdf(buf: &[u8]) -> bool {
	if !buf.starts_with(b"%PDF-") {
		return false;
	}
	contains(buf, b"trailer") && contains(buf, b"startxref") && contains(buf, b"%%EOF")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
	haystack.windows(needle.len()).any(|w| w == needle)
}

/// Heuristic binary/text classification: valid UTF-8 and a low ratio of
/// non-printable, non-whitespace bytes.
fn looks_like_text(buf: &[u8]) -> bool {
	if buf.is_empty() {
		return true;
	}
	if std::str::from_utf8(buf).is_err() {
		return false;
	}
	let non_text = buf
		.iter()
		.filter(|&&b| !(b.is_ascii_graphic() || b == b' ' || b == b'\t' || b == b'\n' || b == b'\r'))
		.count();
	(non_text as f64 / buf.len() as f64) < BINARY_BYTE_RATIO_THRESHOLD
}
