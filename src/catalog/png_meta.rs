//! PNG text-chunk metadata: extraction of generator payloads (workflow and
//! prompt JSON, rating, tags) and best-effort write-back of user edits.
//!
//! The chunk walk is done by hand; only text chunks are interpreted and the
//! image data is never re-encoded when writing.

use super::CatalogError;
use flate2::read::ZlibDecoder;
use serde_json::{Map, Value};
use std::io::Read;
use std::path::Path;
use tracing::debug;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Keywords replaced wholesale when user edits are written back.
const USER_KEYWORDS: [&str; 5] = ["Rating", "Title", "Tags", "Keywords", "XML:com.adobe.xmp"];

/// Extract all metadata carried by an image file: basic file info plus, for
/// PNG, every text chunk (tEXt/zTXt/iTXt) with generator payloads parsed into
/// structured values.
pub fn extract_metadata(path: &Path) -> Result<Map<String, Value>, CatalogError> {
    let buffer = std::fs::read(path)?;
    let mut meta = Map::new();

    let mut fileinfo = Map::new();
    fileinfo.insert(
        "filename".to_string(),
        Value::from(
            path.file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default(),
        ),
    );
    fileinfo.insert("size_bytes".to_string(), Value::from(buffer.len() as u64));
    if let Ok(modified) = std::fs::metadata(path).and_then(|m| m.modified()) {
        let datetime = chrono::DateTime::<chrono::Utc>::from(modified);
        fileinfo.insert(
            "modified".to_string(),
            Value::from(datetime.format("%Y-%m-%dT%H:%M:%S").to_string()),
        );
    }

    if buffer.len() < 8 || &buffer[0..8] != PNG_SIGNATURE {
        meta.insert("fileinfo".to_string(), Value::Object(fileinfo));
        return Ok(meta);
    }

    let mut pos = 8; // Skip PNG signature

    while pos + 12 <= buffer.len() {
        let chunk_length = u32::from_be_bytes([
            buffer[pos],
            buffer[pos + 1],
            buffer[pos + 2],
            buffer[pos + 3],
        ]) as usize;
        let chunk_type = &buffer[pos + 4..pos + 8];

        let chunk_data_start = pos + 8;
        let chunk_data_end = chunk_data_start + chunk_length;
        if chunk_data_end > buffer.len() {
            break;
        }
        let chunk_data = &buffer[chunk_data_start..chunk_data_end];

        match chunk_type {
            b"IHDR" if chunk_length >= 8 => {
                let width = u32::from_be_bytes([
                    chunk_data[0],
                    chunk_data[1],
                    chunk_data[2],
                    chunk_data[3],
                ]);
                let height = u32::from_be_bytes([
                    chunk_data[4],
                    chunk_data[5],
                    chunk_data[6],
                    chunk_data[7],
                ]);
                fileinfo.insert("width".to_string(), Value::from(width));
                fileinfo.insert("height".to_string(), Value::from(height));
            }
            b"tEXt" => {
                if let Some((keyword, text)) = decode_text_chunk(chunk_data) {
                    interpret_keyword(&mut meta, &keyword, &text);
                }
            }
            b"zTXt" => {
                if let Some((keyword, text)) = decode_compressed_text_chunk(chunk_data) {
                    interpret_keyword(&mut meta, &keyword, &text);
                }
            }
            b"iTXt" => {
                if let Some((keyword, text)) = decode_international_text_chunk(chunk_data) {
                    interpret_keyword(&mut meta, &keyword, &text);
                }
            }
            b"IEND" => break,
            _ => {}
        }

        // Move to next chunk (length + type + data + CRC)
        pos += 8 + chunk_length + 4;
    }

    meta.insert("fileinfo".to_string(), Value::Object(fileinfo));
    Ok(meta)
}

/// Write user-edit text chunks into a PNG file, replacing existing chunks
/// with the same keywords. Returns false (without touching the file) for
/// non-PNG sources; the JSON store remains authoritative either way.
pub fn write_text_chunks(path: &Path, entries: &[(String, String)]) -> Result<bool, CatalogError> {
    let buffer = std::fs::read(path)?;
    if buffer.len() < 8 || &buffer[0..8] != PNG_SIGNATURE {
        return Ok(false);
    }

    // Every user-owned keyword is dropped from the file, not just the ones
    // being rewritten, so cleared fields do not linger as stale chunks.
    let replaced: Vec<&str> = entries
        .iter()
        .map(|(keyword, _)| keyword.as_str())
        .chain(USER_KEYWORDS)
        .collect();

    let mut output = Vec::with_capacity(buffer.len());
    output.extend_from_slice(PNG_SIGNATURE);

    let mut pos = 8;
    while pos + 12 <= buffer.len() {
        let chunk_length = u32::from_be_bytes([
            buffer[pos],
            buffer[pos + 1],
            buffer[pos + 2],
            buffer[pos + 3],
        ]) as usize;
        let chunk_type = &buffer[pos + 4..pos + 8];
        let chunk_end = pos + 8 + chunk_length + 4;
        if pos + 8 + chunk_length > buffer.len() {
            break;
        }
        let chunk_data = &buffer[pos + 8..pos + 8 + chunk_length];

        if chunk_type == b"IEND" {
            for (keyword, text) in entries {
                output.extend_from_slice(&encode_text_chunk(keyword, text));
            }
            output.extend_from_slice(&buffer[pos..chunk_end.min(buffer.len())]);
            pos = chunk_end;
            break;
        }

        // Drop any prior text chunk we are about to rewrite.
        let keyword = match chunk_type {
            b"tEXt" | b"zTXt" | b"iTXt" => chunk_keyword(chunk_data),
            _ => None,
        };
        let superseded = keyword
            .as_deref()
            .is_some_and(|k| replaced.contains(&k));
        if !superseded {
            output.extend_from_slice(&buffer[pos..chunk_end.min(buffer.len())]);
        }

        pos = chunk_end;
    }

    // Trailing bytes after IEND (rare, but preserve them).
    if pos < buffer.len() {
        output.extend_from_slice(&buffer[pos..]);
    }

    let tmp = path.with_extension("png.tmp");
    std::fs::write(&tmp, &output)?;
    std::fs::rename(&tmp, path)?;
    debug!("rewrote {} text chunks in {:?}", entries.len(), path);
    Ok(true)
}

/// Build the text chunks for a merged metadata record: plain Rating/Title/
/// Tags plus an XMP packet so OS indexers pick the fields up.
pub fn user_edit_chunks(record: &Map<String, Value>) -> Vec<(String, String)> {
    let rating = record.get("rating").and_then(Value::as_i64);
    let title = record
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty());
    let tags: Vec<String> = match record.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let mut chunks = Vec::new();
    if let Some(rating) = rating {
        chunks.push(("Rating".to_string(), rating.to_string()));
    }
    if let Some(title) = title {
        chunks.push(("Title".to_string(), title.to_string()));
    }
    if !tags.is_empty() {
        chunks.push(("Tags".to_string(), tags.join(", ")));
        chunks.push(("Keywords".to_string(), tags.join(", ")));
    }
    if rating.is_some() || title.is_some() || !tags.is_empty() {
        chunks.push((
            "XML:com.adobe.xmp".to_string(),
            xmp_packet(rating, title, &tags),
        ));
    }
    chunks
}

/// Minimal XMP packet carrying rating, title, and tags.
fn xmp_packet(rating: Option<i64>, title: Option<&str>, tags: &[String]) -> String {
    let mut description = format!(
        "<rdf:Description rdf:about=\"\" xmp:Rating=\"{}\">",
        rating.unwrap_or(0)
    );
    if let Some(title) = title {
        description.push_str(&format!(
            "<dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></dc:title>",
            xml_escape(title)
        ));
    }
    if !tags.is_empty() {
        description.push_str("<dc:subject><rdf:Bag>");
        for tag in tags {
            description.push_str(&format!("<rdf:li>{}</rdf:li>", xml_escape(tag)));
        }
        description.push_str("</rdf:Bag></dc:subject>");
    }
    description.push_str("</rdf:Description>");

    format!(
        "<?xpacket begin=\"\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\
         <x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\
         <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\" \
         xmlns:xmp=\"http://ns.adobe.com/xap/1.0/\" \
         xmlns:dc=\"http://purl.org/dc/elements/1.1/\">{description}</rdf:RDF>\
         </x:xmpmeta><?xpacket end=\"w\"?>"
    )
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn interpret_keyword(meta: &mut Map<String, Value>, keyword: &str, text: &str) {
    match keyword {
        // Generator payloads are JSON documents stored as text.
        "workflow" | "prompt" => {
            let value = serde_json::from_str(text).unwrap_or_else(|_| Value::from(text));
            meta.insert(keyword.to_string(), value);
        }
        "Rating" => {
            let rating = text.trim().parse::<i64>().unwrap_or(0).clamp(0, 5);
            meta.insert("rating".to_string(), Value::from(rating));
        }
        "Title" => {
            meta.insert("title".to_string(), Value::from(text));
        }
        "Tags" | "Keywords" => {
            // JSON array or comma-separated string.
            let tags: Vec<String> = match serde_json::from_str::<Value>(text) {
                Ok(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => text
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
            };
            meta.entry("tags".to_string())
                .or_insert_with(|| Value::from(tags));
        }
        _ => {
            let value = serde_json::from_str(text).unwrap_or_else(|_| Value::from(text));
            meta.insert(keyword.to_string(), value);
        }
    }
}

fn chunk_keyword(data: &[u8]) -> Option<String> {
    let null = data.iter().position(|&b| b == 0)?;
    String::from_utf8(data[..null].to_vec()).ok()
}

fn decode_text_chunk(data: &[u8]) -> Option<(String, String)> {
    let null = data.iter().position(|&b| b == 0)?;
    let keyword = String::from_utf8(data[..null].to_vec()).ok()?;
    let text = String::from_utf8_lossy(&data[null + 1..]).into_owned();
    Some((keyword, text))
}

fn decode_compressed_text_chunk(data: &[u8]) -> Option<(String, String)> {
    let null = data.iter().position(|&b| b == 0)?;
    let keyword = String::from_utf8(data[..null].to_vec()).ok()?;
    // keyword NUL, then one compression-method byte (0 = deflate).
    if data.len() < null + 2 || data[null + 1] != 0 {
        return None;
    }
    let mut decoder = ZlibDecoder::new(&data[null + 2..]);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).ok()?;
    Some((keyword, String::from_utf8_lossy(&decompressed).into_owned()))
}

fn decode_international_text_chunk(data: &[u8]) -> Option<(String, String)> {
    let null = data.iter().position(|&b| b == 0)?;
    let keyword = String::from_utf8(data[..null].to_vec()).ok()?;
    // keyword NUL, compression flag, compression method, then two more
    // NUL-terminated fields (language tag, translated keyword) before the text.
    let rest = &data[null + 1..];
    if rest.len() < 2 {
        return None;
    }
    let compressed = rest[0] == 1;
    let rest = &rest[2..];
    let lang_null = rest.iter().position(|&b| b == 0)?;
    let rest = &rest[lang_null + 1..];
    let translated_null = rest.iter().position(|&b| b == 0)?;
    let payload = &rest[translated_null + 1..];

    let text = if compressed {
        let mut decoder = ZlibDecoder::new(payload);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).ok()?;
        String::from_utf8_lossy(&decompressed).into_owned()
    } else {
        String::from_utf8_lossy(payload).into_owned()
    };
    Some((keyword, text))
}

fn encode_text_chunk(keyword: &str, text: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(keyword.len() + 1 + text.len());
    data.extend_from_slice(keyword.as_bytes());
    data.push(0);
    data.extend_from_slice(text.as_bytes());

    let mut chunk = Vec::with_capacity(data.len() + 12);
    chunk.extend_from_slice(&(data.len() as u32).to_be_bytes());
    chunk.extend_from_slice(b"tEXt");
    chunk.extend_from_slice(&data);

    let mut crc = flate2::Crc::new();
    crc.update(b"tEXt");
    crc.update(&data);
    chunk.extend_from_slice(&crc.sum().to_be_bytes());
    chunk
}
