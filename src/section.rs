use std::fmt;

/// The five sub-divisions ("działy") of a land-registry entry, in print order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// I-O: property designation.
    PropertyDesignation,
    /// I-Sp: rights attached to ownership.
    AttachedRights,
    /// II: ownership.
    Ownership,
    /// III: encumbrances and restrictions.
    Encumbrances,
    /// IV: mortgages.
    Mortgages,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::PropertyDesignation,
        Section::AttachedRights,
        Section::Ownership,
        Section::Encumbrances,
        Section::Mortgages,
    ];

    /// Short label as it appears in the record, e.g. `I-Sp`.
    pub fn label(self) -> &'static str {
        match self {
            Section::PropertyDesignation => "I-O",
            Section::AttachedRights => "I-Sp",
            Section::Ownership => "II",
            Section::Encumbrances => "III",
            Section::Mortgages => "IV",
        }
    }

    /// Caption of the tab button that switches the viewer to this section.
    pub fn tab_caption(self) -> String {
        format!("Dział {}", self.label())
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// PDF bytes exported for one section.
#[derive(Debug, Clone)]
pub struct SectionDocument {
    pub section: Section,
    pub bytes: Vec<u8>,
}

// ── Tests ──
