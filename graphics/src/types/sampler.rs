//! Sampler descriptors and the presets of the shared sampler set.

pub use sandpiper_core::sampler::{AddressMode, CompareFunction, FilterMode};

/// Descriptor for creating a sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    /// Addressing of the u, v and w axes.
    pub address_modes: [AddressMode; 3],
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
    pub compare: Option<CompareFunction>,
    /// 1 disables anisotropic filtering.
    pub anisotropy_clamp: u16,
}

impl SamplerDescriptor {
    /// Bilinear filtering with trilinear mips, clamped to the edge.
    pub fn linear_clamp() -> Self {
        Self::filtered(FilterMode::Linear, AddressMode::ClampToEdge)
    }

    pub fn linear_repeat() -> Self {
        Self::filtered(FilterMode::Linear, AddressMode::Repeat)
    }

    pub fn nearest_clamp() -> Self {
        Self::filtered(FilterMode::Nearest, AddressMode::ClampToEdge)
    }

    /// Repeating linear sampler with `level`x anisotropic filtering.
    ///
    /// Anisotropy requires linear filtering on every stage, which this preset
    /// always has.
    pub fn linear_repeat_anisotropic(level: u16) -> Self {
        Self {
            anisotropy_clamp: level.max(1),
            ..Self::linear_repeat()
        }
    }

    fn filtered(filter: FilterMode, address: AddressMode) -> Self {
        Self {
            address_modes: [address; 3],
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Turn the sampler into a depth-comparison sampler.
    pub fn with_compare(mut self, compare: CompareFunction) -> Self {
        self.compare = Some(compare);
        self
    }

    pub fn is_anisotropic(&self) -> bool {
        self.anisotropy_clamp > 1
    }
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            address_modes: [AddressMode::ClampToEdge; 3],
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            anisotropy_clamp: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let clamp = SamplerDescriptor::linear_clamp();
        assert_eq!(clamp.min_filter, FilterMode::Linear);
        assert_eq!(clamp.address_modes, [AddressMode::ClampToEdge; 3]);

        let nearest = SamplerDescriptor::nearest_clamp();
        assert_eq!(nearest.mag_filter, FilterMode::Nearest);
        assert!(!nearest.is_anisotropic());
    }

    #[test]
    fn test_anisotropic_preset_repeats() {
        let aniso = SamplerDescriptor::linear_repeat_anisotropic(16);
        assert_eq!(aniso.anisotropy_clamp, 16);
        assert_eq!(aniso.address_modes, [AddressMode::Repeat; 3]);
        assert_eq!(aniso.mipmap_filter, FilterMode::Linear);

        assert!(!SamplerDescriptor::linear_repeat_anisotropic(0).is_anisotropic());
    }
}
