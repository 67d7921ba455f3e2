//! Resolving an uploaded file into an ordered set of page images.
//!
//! Raster images are a single page (the upload itself). PDFs are rasterized
//! with Poppler's `pdftoppm` into one PNG per page. Either way, everything
//! lives in a per-file working directory that is removed when the
//! [`PageSet`] is dropped, on every exit path.

use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;
use uuid::Uuid;

use crate::prelude::*;

/// Upload extensions we accept, lowercase, with the leading dot.
pub const ALLOWED_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp", ".pdf"];

/// Matches rasterizer output files and captures the page number.
static PAGE_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^page-(\d+)\.png$").expect("failed to compile regex"));

/// One file pulled out of the multipart upload.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    /// The client-supplied file name.
    pub name: String,

    /// The raw file contents.
    pub data: Vec<u8>,
}

impl UploadedFile {
    /// The lowercased extension of the file name, including the dot.
    pub fn extension(&self) -> String {
        match self.name.rfind('.') {
            Some(idx) if idx > 0 => self.name[idx..].to_lowercase(),
            _ => String::new(),
        }
    }

    /// Is this an extension we accept at all?
    pub fn has_allowed_extension(&self) -> bool {
        ALLOWED_EXTENSIONS.contains(&self.extension().as_str())
    }
}

/// Replace anything shell- or path-hostile in a client file name.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// The ordered page images for one file, plus the working directory that
/// owns them.
#[derive(Debug)]
pub struct PageSet {
    /// Our working directory. Held only so that [`Drop`] reclaims it.
    _workdir: tempfile::TempDir,

    /// Paths of the page images, in ascending page order.
    pages: Vec<PathBuf>,
}

impl PageSet {
    /// Resolve an uploaded file into its page images.
    ///
    /// The upload is persisted into a fresh working directory under
    /// `temp_root`, namespaced by `file_id` so concurrent batches never
    /// collide.
    #[instrument(level = "debug", skip_all, fields(file_id = %file_id, name = %file.name))]
    pub async fn resolve(
        file: &UploadedFile,
        file_id: Uuid,
        temp_root: &Path,
        dpi: u32,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(temp_root)
            .await
            .with_context(|| format!("failed to create temp root {:?}", temp_root.display()))?;
        let workdir = tempfile::Builder::new()
            .prefix(&format!("{file_id}-"))
            .tempdir_in(temp_root)
            .context("failed to create working directory")?;

        let upload_path = workdir.path().join(sanitize_file_name(&file.name));
        tokio::fs::write(&upload_path, &file.data)
            .await
            .with_context(|| format!("failed to persist upload {:?}", upload_path.display()))?;

        let pages = if file.extension() == ".pdf" {
            rasterize_pdf(&upload_path, workdir.path(), dpi).await?
        } else {
            vec![upload_path]
        };

        Ok(Self {
            _workdir: workdir,
            pages,
        })
    }

    /// The page images, in ascending page order.
    pub fn pages(&self) -> &[PathBuf] {
        &self.pages
    }
}

/// Rasterize a PDF into `page-N.png` files and return them in page order.
#[instrument(level = "debug", skip_all, fields(path = %pdf_path.display(), dpi))]
async fn rasterize_pdf(pdf_path: &Path, workdir: &Path, dpi: u32) -> Result<Vec<PathBuf>> {
    let output = Command::new("pdftoppm")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-png")
        .arg(pdf_path)
        .arg(workdir.join("page"))
        .output()
        .await
        .with_context(|| format!("failed to run pdftoppm on {:?}", pdf_path.display()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit = output
            .status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        anyhow::bail!(
            "pdftoppm failed with exit code {}: {}",
            exit,
            stderr.trim()
        );
    }

    let mut entries = tokio::fs::read_dir(workdir)
        .await
        .with_context(|| format!("failed to read working directory {:?}", workdir.display()))?;
    let mut pages = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .context("failed to read working directory entry")?
    {
        let name = entry.file_name();
        if let Some(page_number) = parse_page_number(&name.to_string_lossy()) {
            pages.push((page_number, entry.path()));
        }
    }
    if pages.is_empty() {
        anyhow::bail!("PDF conversion produced no pages");
    }

    // Sort numerically. Lexical order puts page 10 before page 2.
    pages.sort_by_key(|(page_number, _)| *page_number);
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}

/// Extract the page number from a rasterizer output file name.
fn parse_page_number(file_name: &str) -> Option<u32> {
    let caps = PAGE_FILE_RE.captures(file_name)?;
    caps[1].parse().ok()
}
