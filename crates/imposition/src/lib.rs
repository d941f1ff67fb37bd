//! Imposition engine: lays a batch of input PDFs' pages onto
//! composite A4 sheets arranged in a fixed grid, preserving aspect ratio and
//! input/page order.

mod error;
mod layout;

pub use error::ImpositionError;
pub use layout::LayoutConfig;

use impose_pdf_composer::{embed_page_as_xobject, ordered_page_ids, page_dimensions};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};

/// One named input to a compose call: a source identifier (used in
/// `BadInput` error messages) and its raw PDF bytes.
pub struct Input {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Resource ceiling enforced before any rendering begins.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_total_input_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_total_input_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Composes `inputs` into a single composite PDF per `cfg`. `on_page` is
/// invoked once per source page placed, `(pages_done, pages_total)`, so a
/// caller (the scheduler's worker loop) can forward coalesced progress; it
/// returns `false` to request cooperative cancellation at the next page
/// boundary, in which case `compose` returns `Err(ImpositionError::Cancelled)`
/// and no output is produced.
///
/// Fails fast with `BadInput` naming the first unreadable file; no partial
/// output is produced for any rejected batch.
pub fn compose(
    inputs: &[Input],
    cfg: &LayoutConfig,
    limits: ResourceLimits,
    mut on_page: impl FnMut(usize, usize) -> bool,
) -> Result<Vec<u8>, ImpositionError> {
    let total_bytes: u64 = inputs.iter().map(|i| i.bytes.len() as u64).sum();
    if total_bytes > limits.max_total_input_bytes {
        return Err(ImpositionError::Oversize {
            actual: total_bytes,
            limit: limits.max_total_input_bytes,
        });
    }

    // Parse every input up front: a corrupt file must abort before any output
    // is built, and must name the first bad file (not the last).
    let mut source_docs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let doc = Document::load_mem(&input.bytes)
            .map_err(|e| ImpositionError::BadInput(format!("{}: {}", input.name, e)))?;
        source_docs.push(doc);
    }

    let mut pages = Vec::new();
    for doc in &source_docs {
        for page_id in ordered_page_ids(doc) {
            pages.push(page_id);
        }
    }
    // Track which source document each collected page id belongs to, since
    // page ids are only unique within their own document.
    let mut page_owner = Vec::with_capacity(pages.len());
    for (doc_index, doc) in source_docs.iter().enumerate() {
        for _ in ordered_page_ids(doc) {
            page_owner.push(doc_index);
        }
    }

    if pages.is_empty() {
        return Err(ImpositionError::EmptyBatch);
    }

    let total_pages = pages.len();
    let slot_count = cfg.slot_count();
    let (page_w, page_h) = cfg.page_size_pt();

    let mut target = Document::with_version("1.7");
    let pages_id = target.new_object_id();
    let mut sheet_ids = Vec::with_capacity(cfg.sheet_count(total_pages));

    for (sheet_index, chunk) in pages.chunks(slot_count).enumerate() {
        let mut resources = Dictionary::new();
        let mut xobject_dict = Dictionary::new();
        let mut content = Vec::new();

        for (slot, &page_id) in chunk.iter().enumerate() {
            let global_index = sheet_index * slot_count + slot;
            let doc_index = page_owner[global_index];
            let (xobj_id, (native_w, native_h)) =
                embed_page_as_xobject(&mut target, &source_docs[doc_index], page_id)?;

            let name = format!("X{}", slot);
            xobject_dict.set(name.as_bytes(), Object::Reference(xobj_id));

            let cell = cfg.slot_cell(slot);
            let (scale, origin_x, origin_y) =
                LayoutConfig::fit_in_cell(cell, native_w, native_h);

            content.extend_from_slice(
                format!(
                    "q {:.6} 0 0 {:.6} {:.6} {:.6} cm /{} Do Q\n",
                    scale, scale, origin_x, origin_y, name
                )
                .as_bytes(),
            );

            if !on_page(global_index + 1, total_pages) {
                return Err(ImpositionError::Cancelled);
            }
        }

        resources.set("XObject", Object::Dictionary(xobject_dict));
        let content_id = target.add_object(Object::Stream(Stream::new(dictionary! {}, content)));

        let page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.0.into(), 0.0.into(), page_w.into(), page_h.into()],
            "Contents" => content_id,
            "Resources" => resources,
        };
        sheet_ids.push(target.add_object(Object::Dictionary(page_dict)));
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => sheet_ids.iter().cloned().map(Object::Reference).collect::<Vec<_>>(),
        "Count" => sheet_ids.len() as i64,
    };
    target.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = target.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    target.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    target
        .save_to(&mut out)
        .map_err(|e| ImpositionError::Composer(impose_pdf_composer::ComposerError::Pdf(e)))?;
    Ok(out)
}
