//! Per-namespace protection profile.
//!
//! A [`NamespaceEntry`] is derived once from the capability data a controller
//! reports at attach time and never changes afterwards.

use crate::dif::{ContextError, DifContext, DifContextParams, DifFlags, DifType, PiLocation};

/// Namespace capability data as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsCapabilities {
    /// Namespace ID (1-indexed)
    pub id: u32,
    /// Namespace is active on the controller
    pub active: bool,
    /// Extended sector size: data plus interleaved metadata
    pub sector_size: u32,
    /// Metadata bytes per sector
    pub md_size: u32,
    /// Metadata is transferred inline (extended LBA)
    pub extended_lba: bool,
    /// PI occupies the first eight bytes of the metadata
    pub pi_first: bool,
    /// Formatted protection type
    pub pi_type: DifType,
    /// Controller reports protection information support for the namespace
    pub pi_supported: bool,
    /// Capacity in bytes
    pub size: u64,
}

/// Immutable protection parameters for one active namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceEntry {
    /// Index of the owning controller in the registry
    pub ctrlr: usize,
    pub nsid: u32,
    pub block_size: u32,
    pub md_size: u32,
    pub md_interleave: bool,
    pub pi_location: PiLocation,
    pub pi_type: DifType,
    pub dif_flags: DifFlags,
    pub size: u64,
}

impl NamespaceEntry {
    /// Map discovery data onto an entry.
    ///
    /// Inactive namespaces produce no entry. Guard checking is enabled iff the
    /// controller reports PI support and the format carries metadata.
    pub fn from_capabilities(ctrlr: usize, ctrlr_name: &str, caps: &NsCapabilities) -> Option<Self> {
        if !caps.active {
            log::info!(
                "Controller {}: Skipping inactive NS {}",
                ctrlr_name,
                caps.id
            );
            return None;
        }

        let dif_flags = if caps.pi_supported && caps.md_size > 0 {
            DifFlags::GUARD_CHECK
        } else {
            DifFlags::empty()
        };

        let entry = Self {
            ctrlr,
            nsid: caps.id,
            block_size: caps.sector_size,
            md_size: caps.md_size,
            md_interleave: caps.extended_lba,
            pi_location: if caps.pi_first {
                PiLocation::Head
            } else {
                PiLocation::Tail
            },
            pi_type: caps.pi_type,
            dif_flags,
            size: caps.size,
        };
        log::info!(
            "  Namespace ID: {} size: {}GB",
            entry.nsid,
            entry.size / 1_000_000_000
        );
        Some(entry)
    }

    /// Why this namespace has nothing to demonstrate, if anything.
    pub fn ineligibility(&self) -> Option<&'static str> {
        if self.dif_flags.is_empty() {
            Some("protection information not supported")
        } else if !self.md_interleave {
            Some("metadata is not interleaved")
        } else if self.md_size == 0 {
            Some("no metadata")
        } else {
            None
        }
    }

    /// Build a protection context for an I/O starting at `lba`.
    ///
    /// The reference tag is seeded from the LBA, as the device does for
    /// Type 1 protection.
    pub fn dif_context(&self, lba: u64, app_tag: u16, apptag_mask: u16) -> Result<DifContext, ContextError> {
        DifContext::new(DifContextParams {
            block_size: self.block_size,
            md_size: self.md_size,
            md_interleave: self.md_interleave,
            pi_location: self.pi_location,
            dif_type: self.pi_type,
            dif_flags: self.dif_flags,
            init_ref_tag: lba as u32,
            app_tag,
            apptag_mask,
            start_block: 0,
            guard_seed: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> NsCapabilities {
        NsCapabilities {
            id: 1,
            active: true,
            sector_size: 4104,
            md_size: 8,
            extended_lba: true,
            pi_first: false,
            pi_type: DifType::Type1,
            pi_supported: true,
            size: 4_000_000_000,
        }
    }

    #[test]
    fn test_inactive_namespace_excluded() {
        let caps = NsCapabilities {
            active: false,
            ..caps()
        };
        assert_eq!(NamespaceEntry::from_capabilities(0, "ctrl", &caps), None);
    }

    #[test]
    fn test_fields_copied() {
        let entry = NamespaceEntry::from_capabilities(3, "ctrl", &caps()).unwrap();
        assert_eq!(entry.ctrlr, 3);
        assert_eq!(entry.nsid, 1);
        assert_eq!(entry.block_size, 4104);
        assert_eq!(entry.md_size, 8);
        assert!(entry.md_interleave);
        assert_eq!(entry.pi_location, PiLocation::Tail);
        assert_eq!(entry.pi_type, DifType::Type1);
        assert_eq!(entry.dif_flags, DifFlags::GUARD_CHECK);
        assert_eq!(entry.ineligibility(), None);
    }

    #[test]
    fn test_pi_first_maps_to_head() {
        let caps = NsCapabilities {
            pi_first: true,
            ..caps()
        };
        let entry = NamespaceEntry::from_capabilities(0, "ctrl", &caps).unwrap();
        assert_eq!(entry.pi_location, PiLocation::Head);
    }

    #[test]
    fn test_no_pi_support_means_no_checks() {
        let caps = NsCapabilities {
            pi_supported: false,
            ..caps()
        };
        let entry = NamespaceEntry::from_capabilities(0, "ctrl", &caps).unwrap();
        assert!(entry.dif_flags.is_empty());
        assert!(entry.ineligibility().is_some());
    }

    #[test]
    fn test_no_metadata_means_no_checks() {
        let caps = NsCapabilities {
            sector_size: 4096,
            md_size: 0,
            ..caps()
        };
        let entry = NamespaceEntry::from_capabilities(0, "ctrl", &caps).unwrap();
        assert!(entry.dif_flags.is_empty());
    }

    #[test]
    fn test_separate_metadata_ineligible() {
        let caps = NsCapabilities {
            sector_size: 4096,
            extended_lba: false,
            ..caps()
        };
        let entry = NamespaceEntry::from_capabilities(0, "ctrl", &caps).unwrap();
        assert_eq!(entry.ineligibility(), Some("metadata is not interleaved"));
    }

    #[test]
    fn test_context_seeded_from_lba() {
        let entry = NamespaceEntry::from_capabilities(0, "ctrl", &caps()).unwrap();
        let ctx = entry.dif_context(42, 0, 0xffff).unwrap();
        assert_eq!(ctx.data_block_size(), 4096);
        assert_eq!(ctx.ref_tag(0), 42);
    }
}
