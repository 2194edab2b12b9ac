//! Paragraph-boundary text chunker used by the index builder.
//!
//! Splits a document's extracted text into [`Chunk`]s of at most
//! `max_tokens` (approximated as four bytes per token). Paragraphs (`\n\n`)
//! are packed together while they fit; a paragraph that alone exceeds the
//! limit is hard-split at the last newline or space before the limit.
//!
//! Chunk ids are UUIDv5 values derived from the document id and the chunk
//! index, so rebuilding an index from the same artifact yields the same ids.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks with contiguous indices starting at 0.
/// Blank text yields no chunks.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
    let mut current = String::new();

    let flush = |buf: &mut String, chunks: &mut Vec<Chunk>| {
        if !buf.is_empty() {
            let index = chunks.len() as i64;
            chunks.push(make_chunk(document_id, index, buf));
            buf.clear();
        }
    };

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        let would_be = if current.is_empty() {
            para.len()
        } else {
            current.len() + 2 + para.len()
        };
        if would_be > max_chars {
            flush(&mut current, &mut chunks);
        }

        if para.len() > max_chars {
            let mut remaining = para;
            while !remaining.is_empty() {
                let split = split_point(remaining, max_chars);
                let piece = remaining[..split].trim();
                if !piece.is_empty() {
                    current.push_str(piece);
                    flush(&mut current, &mut chunks);
                }
                remaining = &remaining[split..];
            }
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(para);
        }
    }
    flush(&mut current, &mut chunks);
    chunks
}

/// Byte offset to cut `text` at: the last newline or space within `max`
/// bytes, else `max` moved back to a char boundary.
fn split_point(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    let mut limit = max;
    while !text.is_char_boundary(limit) {
        limit -= 1;
    }
    let window = &text[..limit];
    match window.rfind('\n').or_else(|| window.rfind(' ')) {
        Some(pos) if pos > 0 => pos + 1,
        _ if limit > 0 => limit,
        // A single char wider than the limit.
        _ => text.chars().next().map(char::len_utf8).unwrap_or(text.len()),
    }
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let hash = hex::encode(Sha256::digest(text.as_bytes()));
    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}#{}", document_id, index).as_bytes(),
    );
    Chunk {
        id: id.to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
