use super::*;
use std::collections::BTreeMap;

use image::codecs::jpeg::JpegEncoder;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

const A4_WIDTH: f32 = 595.2756;
const A4_HEIGHT: f32 = 841.8898;
const PAGE_MARGIN: f32 = 56.6929;
const LINE_HEIGHT: f32 = 12.0;
const TEXT_FONT_SIZE: i64 = 10;
const WRAP_CHARS: usize = 95;
const JPEG_QUALITY: u8 = 90;
const INHERITED_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

pub(super) fn zip_paths(paths: &[PathBuf], out_zip: &Path) -> Result<PathBuf> {
    let dir = out_zip
        .parent()
        .ok_or_else(|| anyhow!("no parent dir for {}", out_zip.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;

    {
        let mut zip = zip::ZipWriter::new(tmp.as_file_mut());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for path in paths {
            if path.is_dir() {
                let base = path.parent().unwrap_or(path.as_path());
                for entry in walkdir::WalkDir::new(path)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let relative = entry
                        .path()
                        .strip_prefix(base)
                        .with_context(|| format!("relativize {}", entry.path().display()))?;
                    let name = relative.to_string_lossy().replace('\\', "/");
                    add_zip_entry(&mut zip, options, entry.path(), name)?;
                }
            } else {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| anyhow!("no file name in {}", path.display()))?;
                add_zip_entry(&mut zip, options, path, name)?;
            }
        }

        zip.finish().context("finish zip")?;
    }

    tmp.persist(out_zip)
        .map_err(|e| anyhow!("persist {}: {}", out_zip.display(), e))?;
    Ok(out_zip.to_path_buf())
}

fn add_zip_entry<W: std::io::Write + std::io::Seek>(
    zip: &mut zip::ZipWriter<W>,
    options: zip::write::SimpleFileOptions,
    source: &Path,
    name: String,
) -> Result<()> {
    zip.start_file(name, options)
        .with_context(|| format!("add {} to zip", source.display()))?;
    let mut input =
        fs::File::open(source).with_context(|| format!("open {}", source.display()))?;
    std::io::copy(&mut input, zip).with_context(|| format!("compress {}", source.display()))?;
    Ok(())
}

pub(super) fn is_zip(path: &Path) -> bool {
    match fs::File::open(path) {
        Ok(file) => zip::ZipArchive::new(file).is_ok(),
        Err(_) => false,
    }
}

pub(super) fn unzip_to_dir(archive: &Path, out_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(out_dir).with_context(|| format!("create dir {}", out_dir.display()))?;
    let file = fs::File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file).context("read zip archive")?;
    zip.extract(out_dir)
        .with_context(|| format!("extract {}", archive.display()))?;
    Ok(out_dir.to_path_buf())
}

pub(super) fn rename_file(source: &Path, new_name: &str) -> Result<PathBuf> {
    let new_name = sanitize(new_name);
    if new_name.is_empty() || new_name == "." || new_name == ".." {
        return Err(FlowError::EmptyName.into());
    }
    let mut target = source.with_file_name(&new_name);
    if target != source && target.exists() {
        let dir = target
            .parent()
            .ok_or_else(|| anyhow!("no parent dir for {}", target.display()))?;
        target = unique_path(dir, &new_name);
    }
    fs::rename(source, &target)
        .with_context(|| format!("rename {} to {}", source.display(), target.display()))?;
    Ok(target)
}

/// Splits a line into fixed-width chunks, ignoring word boundaries.
pub(super) fn wrap_line(line: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = line.trim_end_matches(['\r', '\n']).chars().collect();
    if chars.len() <= max_chars {
        return vec![chars.into_iter().collect()];
    }
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Lays wrapped lines out on A4 pages; each entry is `(baseline y, text)`.
pub(super) fn layout_text_pages(text: &str) -> Vec<Vec<(f32, String)>> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut raw_lines: Vec<&str> = normalized.lines().collect();
    if raw_lines.is_empty() {
        raw_lines.push("");
    }

    let top = A4_HEIGHT - PAGE_MARGIN;
    let mut pages = vec![Vec::new()];
    let mut y = top;
    for raw in raw_lines {
        for line in wrap_line(raw, WRAP_CHARS) {
            if y < PAGE_MARGIN {
                pages.push(Vec::new());
                y = top;
            }
            if let Some(page) = pages.last_mut() {
                page.push((y, line));
            }
            y -= LINE_HEIGHT;
        }
    }
    pages
}

fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7e | 0xa0..=0xff => c as u32 as u8,
            0x09 => b' ',
            _ => b'?',
        })
        .collect()
}

pub(super) fn text_to_pdf(text: &str, out_pdf: &Path) -> Result<PathBuf> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for lines in layout_text_pages(text) {
        let mut operations = Vec::with_capacity(lines.len() * 5);
        for (y, line) in lines {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), TEXT_FONT_SIZE.into()]));
            operations.push(Operation::new("Td", vec![PAGE_MARGIN.into(), y.into()]));
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(&line), StringFormat::Literal)],
            ));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().context("encode page content")?,
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), A4_WIDTH.into(), A4_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    save_document(&mut doc, out_pdf)
}

/// One page per image, sized to the image in points. Every image is flattened to RGB.
pub(super) fn images_to_pdf(images: &[PathBuf], out_pdf: &Path) -> Result<PathBuf> {
    if images.is_empty() {
        return Err(FlowError::NoImages.into());
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();

    for path in images {
        let decoded =
            image::open(path).with_context(|| format!("decode image {}", path.display()))?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&rgb)
            .with_context(|| format!("encode image {}", path.display()))?;

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        (width as i64).into(),
                        0.into(),
                        0.into(),
                        (height as i64).into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().context("encode page content")?,
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), (width as i64).into(), (height as i64).into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    save_document(&mut doc, out_pdf)
}

/// Concatenates the pages of every input, in input order.
pub(super) fn merge_pdfs(pdfs: &[PathBuf], out_pdf: &Path) -> Result<PathBuf> {
    if pdfs.is_empty() {
        return Err(FlowError::NoPdfs.into());
    }

    let mut next_id = 1;
    let mut page_ids: Vec<ObjectId> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for path in pdfs {
        let mut doc =
            Document::load(path).with_context(|| format!("load pdf {}", path.display()))?;
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        for page_id in doc.get_pages().into_values() {
            let mut page = doc
                .get_dictionary(page_id)
                .with_context(|| format!("read page in {}", path.display()))?
                .clone();
            inherit_page_attributes(&doc, &mut page);
            objects.insert(page_id, Object::Dictionary(page));
            page_ids.push(page_id);
        }

        for (id, object) in doc.objects {
            if is_page_tree_node(&object) {
                continue;
            }
            objects.entry(id).or_insert(object);
        }
    }

    let mut merged = Document::with_version("1.5");
    merged.objects = objects;
    merged.max_id = next_id.saturating_sub(1);
    let pages_id = merged.new_object_id();
    for page_id in &page_ids {
        if let Ok(page) = merged
            .get_object_mut(*page_id)
            .and_then(|object| object.as_dict_mut())
        {
            page.set("Parent", pages_id);
        }
    }
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Count" => page_ids.len() as i64,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);
    merged.compress();
    save_document(&mut merged, out_pdf)
}

fn is_page_tree_node(object: &Object) -> bool {
    let Ok(dict) = object.as_dict() else {
        return false;
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Catalog") | Ok(b"Pages") | Ok(b"Outlines") | Ok(b"Outline")
    )
}

/// Copies attributes a page inherits from its ancestors onto the page itself.
fn inherit_page_attributes(doc: &Document, page: &mut Dictionary) {
    for key in INHERITED_PAGE_KEYS {
        if page.has(key) {
            continue;
        }
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        let mut depth = 0;
        while let Some(node_id) = parent {
            let Ok(node) = doc.get_dictionary(node_id) else {
                break;
            };
            if let Ok(value) = node.get(key) {
                page.set(key.to_vec(), value.clone());
                break;
            }
            depth += 1;
            if depth > 32 {
                break;
            }
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        }
    }
}

fn save_document(doc: &mut Document, out_pdf: &Path) -> Result<PathBuf> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .with_context(|| format!("serialize {}", out_pdf.display()))?;
    atomic_write(out_pdf, &buffer)?;
    Ok(out_pdf.to_path_buf())
}
