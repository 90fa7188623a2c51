//! Multi-format text extraction for binary documents (PDF, EPUB, images).
//!
//! Extraction is pipeline-layer: the fetcher supplies bytes, the job carries
//! the format resolved at admission, and this module returns plain UTF-8
//! text. The OCR engine is owned here and must be shut down via
//! [`ContentExtractor::shutdown`] when the worker pool drains.

use std::collections::HashMap;
use std::io::{Read, Seek};

use crate::error::IngestError;
use crate::models::DocFormat;
use crate::ocr::OcrEngine;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub struct ContentExtractor {
    ocr: OcrEngine,
}

impl ContentExtractor {
    pub fn new(ocr: OcrEngine) -> ContentExtractor {
        ContentExtractor { ocr }
    }

    /// Extract plain text from document bytes according to the resolved
    /// format. Unsupported formats fail fast and are never retried.
    pub async fn extract(&self, bytes: Vec<u8>, format: &DocFormat) -> Result<String, IngestError> {
        match format {
            DocFormat::Pdf => {
                tokio::task::spawn_blocking(move || extract_pdf(&bytes))
                    .await
                    .map_err(|e| IngestError::Resource(format!("extraction task: {}", e)))?
            }
            DocFormat::Epub => {
                tokio::task::spawn_blocking(move || extract_epub(&bytes))
                    .await
                    .map_err(|e| IngestError::Resource(format!("extraction task: {}", e)))?
            }
            DocFormat::Image(kind) => self.ocr.recognize(&bytes, *kind).await,
            DocFormat::Unsupported(ct) => Err(IngestError::UnsupportedFormat(ct.clone())),
        }
    }

    /// Release the OCR engine. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.ocr.shutdown().await;
    }

    pub fn ocr(&self) -> &OcrEngine {
        &self.ocr
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, IngestError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| IngestError::Extraction(e.to_string()))
}

/// EPUB extraction. The archive is materialized to a scratch file because the
/// ZIP reader needs random access; the temp file is removed on every exit
/// path (drop).
fn extract_epub(bytes: &[u8]) -> Result<String, IngestError> {
    let mut tmp = tempfile::Builder::new()
        .prefix("bookflow-epub-")
        .suffix(".epub")
        .tempfile()
        .map_err(|e| IngestError::Resource(format!("epub scratch file: {}", e)))?;
    std::io::Write::write_all(&mut tmp, bytes)
        .map_err(|e| IngestError::Resource(format!("epub scratch write: {}", e)))?;

    let file = tmp
        .reopen()
        .map_err(|e| IngestError::Resource(format!("epub scratch reopen: {}", e)))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| IngestError::Extraction(format!("epub open: {}", e)))?;

    let container = read_entry_bounded(&mut archive, "META-INF/container.xml")?;
    let opf_path = parse_container(&container)?;
    let opf = read_entry_bounded(&mut archive, &opf_path)?;
    let (manifest, spine) = parse_opf(&opf)?;

    // Hrefs in the manifest are relative to the OPF's own directory.
    let base = match opf_path.rsplit_once('/') {
        Some((dir, _)) => format!("{}/", dir),
        None => String::new(),
    };

    let mut chapters: Vec<String> = Vec::new();
    for idref in &spine {
        let (href, media_type) = manifest
            .get(idref)
            .ok_or_else(|| IngestError::Extraction(format!("spine idref not in manifest: {}", idref)))?;
        if media_type != "application/xhtml+xml" && media_type != "text/html" {
            continue;
        }
        let href = href.split('#').next().unwrap_or(href);
        let entry_name = format!("{}{}", base, href.trim_start_matches("./"));
        let xml = read_entry_bounded(&mut archive, &entry_name)?;
        let text = xhtml_text(&xml)?;
        if !text.is_empty() {
            chapters.push(text);
        }
    }

    Ok(chapters.join("\n"))
}

fn read_entry_bounded<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, IngestError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| IngestError::Extraction(format!("epub entry {}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| IngestError::Extraction(format!("epub entry {}: {}", name, e)))?;
    if out.len() as u64 >= MAX_ENTRY_BYTES {
        return Err(IngestError::Extraction(format!(
            "epub entry {} exceeds size limit ({} bytes)",
            name, MAX_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Pull the OPF package path out of `META-INF/container.xml`.
fn parse_container(xml: &[u8]) -> Result<String, IngestError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"rootfile" {
                    for attr in e.attributes() {
                        let attr =
                            attr.map_err(|e| IngestError::Extraction(format!("container.xml: {}", e)))?;
                        if attr.key.as_ref() == b"full-path" {
                            let value = attr
                                .unescape_value()
                                .map_err(|e| IngestError::Extraction(format!("container.xml: {}", e)))?;
                            return Ok(value.into_owned());
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(IngestError::Extraction(format!("container.xml: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Err(IngestError::Extraction(
        "container.xml has no rootfile entry".to_string(),
    ))
}

/// Parse the OPF package: manifest id → (href, media-type), plus the spine's
/// idrefs in document order.
#[allow(clippy::type_complexity)]
fn parse_opf(xml: &[u8]) -> Result<(HashMap<String, (String, String)>, Vec<String>), IngestError> {
    let mut manifest: HashMap<String, (String, String)> = HashMap::new();
    let mut spine: Vec<String> = Vec::new();

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                match e.local_name().as_ref() {
                    b"item" => {
                        let mut id = None;
                        let mut href = None;
                        let mut media_type = None;
                        for attr in e.attributes() {
                            let attr =
                                attr.map_err(|e| IngestError::Extraction(format!("opf: {}", e)))?;
                            let value = attr
                                .unescape_value()
                                .map_err(|e| IngestError::Extraction(format!("opf: {}", e)))?
                                .into_owned();
                            match attr.key.as_ref() {
                                b"id" => id = Some(value),
                                b"href" => href = Some(value),
                                b"media-type" => media_type = Some(value),
                                _ => {}
                            }
                        }
                        if let (Some(id), Some(href)) = (id, href) {
                            manifest.insert(id, (href, media_type.unwrap_or_default()));
                        }
                    }
                    b"itemref" => {
                        for attr in e.attributes() {
                            let attr =
                                attr.map_err(|e| IngestError::Extraction(format!("opf: {}", e)))?;
                            if attr.key.as_ref() == b"idref" {
                                let value = attr
                                    .unescape_value()
                                    .map_err(|e| IngestError::Extraction(format!("opf: {}", e)))?;
                                spine.push(value.into_owned());
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(IngestError::Extraction(format!("opf: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    if spine.is_empty() {
        return Err(IngestError::Extraction("opf has an empty spine".to_string()));
    }
    Ok((manifest, spine))
}

/// Collect the visible text of an XHTML chapter, skipping script and style
/// content.
fn xhtml_text(xml: &[u8]) -> Result<String, IngestError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if matches!(e.local_name().as_ref(), b"script" | b"style") {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if matches!(e.local_name().as_ref(), b"script" | b"style") {
                    skip_depth = skip_depth.saturating_sub(1);
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if skip_depth == 0 => {
                let text = t.unescape().unwrap_or_default();
                let text = text.trim();
                if !text.is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(text);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(IngestError::Extraction(format!("xhtml: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageKind;
    use std::io::Write;

    fn chapter_xhtml(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?><html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>c</title></head><body><p>{}</p></body></html>",
            body
        )
    }

    /// Minimal EPUB with three chapters; ZIP entry order deliberately differs
    /// from spine order.
    fn minimal_epub(chapters: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts = zip::write::SimpleFileOptions::default();

            zip.start_file("META-INF/container.xml", opts).unwrap();
            zip.write_all(
                br#"<?xml version="1.0"?><container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container"><rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#,
            )
            .unwrap();

            let mut items = String::new();
            let mut refs = String::new();
            for (id, _) in chapters {
                items.push_str(&format!(
                    "<item id=\"{id}\" href=\"{id}.xhtml\" media-type=\"application/xhtml+xml\"/>"
                ));
                refs.push_str(&format!("<itemref idref=\"{id}\"/>"));
            }
            zip.start_file("OEBPS/content.opf", opts).unwrap();
            zip.write_all(
                format!(
                    "<?xml version=\"1.0\"?><package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\"><manifest>{items}</manifest><spine>{refs}</spine></package>"
                )
                .as_bytes(),
            )
            .unwrap();

            // Write chapter files in reverse to prove spine order wins.
            for (id, body) in chapters.iter().rev() {
                zip.start_file(format!("OEBPS/{id}.xhtml"), opts).unwrap();
                zip.write_all(chapter_xhtml(body).as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn epub_chapters_follow_spine_order() {
        let epub = minimal_epub(&[("ch1", "A"), ("ch2", "B"), ("ch3", "C")]);
        let text = extract_epub(&epub).unwrap();
        let a = text.find('A').unwrap();
        let b = text.find('B').unwrap();
        let c = text.find('C').unwrap();
        assert!(a < b && b < c, "spine order not preserved: {}", text);
        assert_eq!(text, "A\nB\nC");
    }

    #[test]
    fn epub_missing_spine_item_is_extraction_error() {
        // Spine points at an id the manifest doesn't declare.
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("META-INF/container.xml", opts).unwrap();
            zip.write_all(
                br#"<?xml version="1.0"?><container><rootfiles><rootfile full-path="content.opf"/></rootfiles></container>"#,
            )
            .unwrap();
            zip.start_file("content.opf", opts).unwrap();
            zip.write_all(
                br#"<?xml version="1.0"?><package><manifest/><spine><itemref idref="ghost"/></spine></package>"#,
            )
            .unwrap();
            zip.finish().unwrap();
        }
        let err = extract_epub(&buf).unwrap_err();
        assert!(matches!(err, IngestError::Extraction(_)));
    }

    #[test]
    fn invalid_epub_bytes_are_extraction_error() {
        let err = extract_epub(b"not a zip archive").unwrap_err();
        assert!(matches!(err, IngestError::Extraction(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn invalid_pdf_bytes_are_extraction_error() {
        let err = extract_pdf(b"not a pdf").unwrap_err();
        assert!(matches!(err, IngestError::Extraction(_)));
    }

    #[test]
    fn xhtml_text_skips_script_and_style() {
        let xml = b"<html><head><style>p { color: red }</style></head><body><p>Kept</p><script>var x = 1;</script><p>Also kept</p></body></html>";
        assert_eq!(xhtml_text(xml).unwrap(), "Kept Also kept");
    }

    #[tokio::test]
    async fn unsupported_format_fails_fast_and_is_not_retryable() {
        let extractor = ContentExtractor::new(OcrEngine::new("eng"));
        let err = extractor
            .extract(b"hello".to_vec(), &DocFormat::Unsupported("text/plain".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
        assert!(!err.is_retryable());
        // The OCR engine must not have been booted by a non-image job.
        assert!(!extractor.ocr().is_initialized().await);
        extractor.shutdown().await;
    }

    #[tokio::test]
    async fn image_dispatch_reaches_ocr_engine() {
        // After shutdown the engine refuses work, which proves the image arm
        // routes to OCR without needing a live Tesseract install.
        let extractor = ContentExtractor::new(OcrEngine::new("eng"));
        extractor.shutdown().await;
        let err = extractor
            .extract(vec![0u8; 8], &DocFormat::Image(ImageKind::Png))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Resource(_)));
    }
}
