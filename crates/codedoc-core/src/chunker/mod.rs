//! Semantic code chunker.
//!
//! Takes regions from the parser and produces chunks suitable for
//! embedding and indexing. Chunks respect AST boundaries and keep the
//! original file's line numbering.
//!
//! ## Chunking Strategy
//!
//! 1. Function/method level — preferred granularity; the region content
//!    already carries decorators, signature, and docstring.
//! 2. Class level — a class small enough for the budget becomes one
//!    chunk and its methods are not emitted separately; an oversized
//!    class is represented by its methods.
//! 3. Module preamble — imports, module docstring, and top-level
//!    constants above the first region form one chunk per file.
//! 4. Fallback — supported files yielding no regions are chunked with a
//!    sliding window at the target size with a small overlap.
//!
//! Oversized regions are split at line boundaries with overlap; split
//! pieces keep their original line ranges, so chunk ids stay stable.

use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::parser::{CodeRegion, ParsedFile};
use crate::types::{chunk_id, Chunk, ChunkKind, Language};

/// Rough token estimation: ~4 characters per token for code.
pub fn estimate_tokens(content: &str) -> u32 {
    ((content.len() / 4) as u32).max(1)
}

/// Chunk one parsed file into embedding-sized pieces.
pub fn chunk_file(
    codebase_id: Uuid,
    file_path: &str,
    language: Language,
    source: &str,
    parsed: &ParsedFile,
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    if parsed.regions.is_empty() {
        if !source.trim().is_empty() {
            chunks.extend(fallback_windows(
                codebase_id,
                file_path,
                language,
                source,
                &parsed.imports,
                config,
            ));
        }
        return chunks;
    }

    // Classes small enough for the budget subsume their methods.
    let mut consumed_method_parents: Vec<&str> = Vec::new();
    for region in &parsed.regions {
        if region.kind == ChunkKind::Class
            && estimate_tokens(&region.content) <= config.token_cap
        {
            consumed_method_parents.push(region.name.as_str());
        }
    }

    for region in &parsed.regions {
        match region.kind {
            ChunkKind::Class => {
                if estimate_tokens(&region.content) <= config.token_cap {
                    chunks.push(region_chunk(
                        codebase_id,
                        file_path,
                        language,
                        region,
                        &parsed.imports,
                    ));
                }
                // Oversized classes are covered by their method chunks.
            }
            ChunkKind::Method => {
                let subsumed = region
                    .parent_class
                    .as_deref()
                    .is_some_and(|p| consumed_method_parents.contains(&p));
                if !subsumed {
                    chunks.extend(region_or_split(
                        codebase_id,
                        file_path,
                        language,
                        region,
                        &parsed.imports,
                        config,
                    ));
                }
            }
            _ => {
                chunks.extend(region_or_split(
                    codebase_id,
                    file_path,
                    language,
                    region,
                    &parsed.imports,
                    config,
                ));
            }
        }
    }

    if let Some(preamble) = module_preamble(
        codebase_id,
        file_path,
        language,
        source,
        parsed,
        config,
    ) {
        chunks.insert(0, preamble);
    }

    chunks
}

/// Build a chunk directly from a region that fits the cap, or split it.
fn region_or_split(
    codebase_id: Uuid,
    file_path: &str,
    language: Language,
    region: &CodeRegion,
    imports: &[String],
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    if estimate_tokens(&region.content) <= config.token_cap {
        return vec![region_chunk(codebase_id, file_path, language, region, imports)];
    }

    // Split at line boundaries with overlap; line ranges stay original.
    let windows = window_lines(
        &region.content,
        region.line_start,
        config.token_target,
        config.overlap_tokens,
    );
    windows
        .into_iter()
        .map(|(start, end, content)| {
            let token_count = estimate_tokens(&content);
            Chunk {
                id: chunk_id(codebase_id, file_path, start, end, region.kind),
                codebase_id,
                file_path: file_path.to_string(),
                line_start: start,
                line_end: end,
                kind: region.kind,
                name: region.name.clone(),
                language,
                content,
                dependencies: referenced_imports(imports, &region.content),
                docstring: region.docstring.clone(),
                parent_class: region.parent_class.clone(),
                token_count,
            }
        })
        .collect()
}

fn region_chunk(
    codebase_id: Uuid,
    file_path: &str,
    language: Language,
    region: &CodeRegion,
    imports: &[String],
) -> Chunk {
    Chunk {
        id: chunk_id(
            codebase_id,
            file_path,
            region.line_start,
            region.line_end,
            region.kind,
        ),
        codebase_id,
        file_path: file_path.to_string(),
        line_start: region.line_start,
        line_end: region.line_end,
        kind: region.kind,
        name: region.name.clone(),
        language,
        content: region.content.clone(),
        dependencies: referenced_imports(imports, &region.content),
        docstring: region.docstring.clone(),
        parent_class: region.parent_class.clone(),
        token_count: estimate_tokens(&region.content),
    }
}

/// The span above the first region: imports, module docstring, constants.
fn module_preamble(
    codebase_id: Uuid,
    file_path: &str,
    language: Language,
    source: &str,
    parsed: &ParsedFile,
    config: &ChunkingConfig,
) -> Option<Chunk> {
    let first_region_line = parsed.regions.iter().map(|r| r.line_start).min()?;
    if first_region_line <= 1 {
        return None;
    }

    let lines: Vec<&str> = source.lines().collect();
    let end = (first_region_line - 1).min(lines.len() as u32);
    let content = lines[..end as usize].join("\n");
    if content.trim().is_empty() {
        return None;
    }

    let kind = if is_pure_import_block(&content) {
        ChunkKind::ImportBlock
    } else {
        ChunkKind::Module
    };

    let name = std::path::Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path)
        .to_string();

    let content = truncate_to_tokens(&content, config.token_cap);
    let token_count = estimate_tokens(&content);

    Some(Chunk {
        id: chunk_id(codebase_id, file_path, 1, end, kind),
        codebase_id,
        file_path: file_path.to_string(),
        line_start: 1,
        line_end: end,
        kind,
        name,
        language,
        content,
        dependencies: parsed.imports.clone(),
        docstring: None,
        parent_class: None,
        token_count,
    })
}

/// Sliding-window chunks for unstructured content.
fn fallback_windows(
    codebase_id: Uuid,
    file_path: &str,
    language: Language,
    source: &str,
    imports: &[String],
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let name = std::path::Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path)
        .to_string();

    window_lines(source, 1, config.token_target, config.overlap_tokens)
        .into_iter()
        .map(|(start, end, content)| {
            let token_count = estimate_tokens(&content);
            Chunk {
                id: chunk_id(codebase_id, file_path, start, end, ChunkKind::Other),
                codebase_id,
                file_path: file_path.to_string(),
                line_start: start,
                line_end: end,
                kind: ChunkKind::Other,
                name: name.clone(),
                language,
                content,
                dependencies: imports.to_vec(),
                docstring: None,
                parent_class: None,
                token_count,
            }
        })
        .collect()
}

/// Split content into line-aligned windows of roughly `target` tokens,
/// overlapping by roughly `overlap` tokens. Returns
/// `(line_start, line_end, content)` triples with 1-indexed lines
/// relative to `base_line`.
fn window_lines(content: &str, base_line: u32, target: u32, overlap: u32) -> Vec<(u32, u32, String)> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        let mut tokens = 0u32;
        let mut end = start;
        while end < lines.len() && tokens < target {
            tokens += estimate_tokens(lines[end]);
            end += 1;
        }

        let window_content = lines[start..end].join("\n");
        windows.push((
            base_line + start as u32,
            base_line + end as u32 - 1,
            window_content,
        ));

        if end >= lines.len() {
            break;
        }

        // Step back far enough to carry ~overlap tokens into the next window.
        let mut back = 0u32;
        let mut next_start = end;
        while next_start > start + 1 && back < overlap {
            next_start -= 1;
            back += estimate_tokens(lines[next_start]);
        }
        start = next_start;
    }

    windows
}

/// Filter the file's imports to those referenced in `content`.
fn referenced_imports(imports: &[String], content: &str) -> Vec<String> {
    imports
        .iter()
        .filter(|import| {
            let last = import
                .rsplit(|c: char| c == '.' || c == ':' || c == '/')
                .next()
                .unwrap_or(import);
            !last.is_empty() && content.contains(last)
        })
        .cloned()
        .collect()
}

/// Truncate content to approximately `max_tokens`, at a line boundary.
fn truncate_to_tokens(content: &str, max_tokens: u32) -> String {
    let max_chars = (max_tokens as usize) * 4;
    if content.len() <= max_chars {
        return content.to_string();
    }
    let truncated = &content[..max_chars];
    match truncated.rfind('\n') {
        Some(last_newline) => content[..last_newline].to_string(),
        None => truncated.to_string(),
    }
}

/// Heuristic: does this preamble consist only of imports and blanks?
fn is_pure_import_block(content: &str) -> bool {
    let mut saw_import = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }
        if ["import ", "from ", "use ", "package ", "require("]
            .iter()
            .any(|p| trimmed.starts_with(p))
            || trimmed == ")"
            || trimmed.starts_with("import(")
        {
            saw_import = true;
        } else {
            return false;
        }
    }
    saw_import
}
