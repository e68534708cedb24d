use lopdf::{dictionary, Document, Object, ObjectId};
use tracing::debug;

use crate::error::EkwError;
use crate::section::{Section, SectionDocument};

/// All five sections of one record concatenated into a single PDF.
#[derive(Debug, Clone)]
pub struct MergedDocument {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// Concatenate section PDFs in canonical section order.
///
/// Each source keeps its own page tree; the tree roots become kids of a new
/// root, so inherited page attributes (media box, resources) survive and the
/// text layer is carried over untouched.
pub fn merge(sections: &[SectionDocument]) -> Result<MergedDocument, EkwError> {
    if sections.len() < Section::ALL.len() {
        return Err(EkwError::IncompleteSectionSet {
            expected: Section::ALL.len(),
            got: sections.len(),
        });
    }

    let mut ordered: Vec<&SectionDocument> = Vec::with_capacity(Section::ALL.len());
    for section in Section::ALL {
        let doc = sections.iter().find(|d| d.section == section).ok_or(
            EkwError::IncompleteSectionSet {
                expected: Section::ALL.len(),
                got: sections.len(),
            },
        )?;
        ordered.push(doc);
    }

    let mut merged = Document::with_version("1.5");
    let root_pages_id = merged.new_object_id();
    let mut next_id = merged.max_id + 1;
    let mut kids: Vec<Object> = Vec::new();
    let mut page_count = 0usize;

    for doc in ordered {
        let mut source = Document::load_mem(&doc.bytes).map_err(|e| corrupt(doc.section, e))?;
        source.renumber_objects_with(next_id);
        next_id = source.max_id + 1;

        let catalog_id = source
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|e| corrupt(doc.section, e))?;
        let pages_id = source
            .get_dictionary(catalog_id)
            .and_then(|catalog| catalog.get(b"Pages"))
            .and_then(Object::as_reference)
            .map_err(|e| corrupt(doc.section, e))?;
        let pages = source.get_pages().len();
        debug!("section {}: {} page(s)", doc.section, pages);

        let tree = source
            .objects
            .get_mut(&pages_id)
            .ok_or_else(|| corrupt(doc.section, "page tree root missing"))?
            .as_dict_mut()
            .map_err(|e| corrupt(doc.section, e))?;
        tree.set("Parent", root_pages_id);

        source.objects.remove(&catalog_id);
        merged.objects.extend(source.objects);
        kids.push(Object::Reference(pages_id));
        page_count += pages;
    }

    merged.objects.insert(
        root_pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(page_count as i64),
        }),
    );
    merged.max_id = next_id - 1;
    let catalog_id: ObjectId = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => root_pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    merged
        .save_to(&mut bytes)
        .map_err(|e| EkwError::Io(std::io::Error::other(e.to_string())))?;

    Ok(MergedDocument { bytes, page_count })
}

fn corrupt(section: Section, err: impl std::fmt::Display) -> EkwError {
    EkwError::SectionExportFailure {
        section,
        reason: format!("unreadable PDF: {}", err),
    }
}

// ── Tests ──
