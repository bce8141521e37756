//! Host type table: the fixed-size numeric vectors a schema field may use,
//! their host widths, and the WGSL type each one maps to.

/// Scalar component kind of a host type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    F32,
    U32,
    I32,
    F64,
}

/// Host-side type of a schema field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostType {
    F32,
    F32x2,
    F32x3,
    F32x4,
    U32,
    U32x2,
    U32x3,
    U32x4,
    I32,
    I32x2,
    I32x3,
    I32x4,
    /// Known on the host but WGSL has no 64-bit float.
    F64,
}

impl HostType {
    pub const ALL: [HostType; 13] = [
        HostType::F32,
        HostType::F32x2,
        HostType::F32x3,
        HostType::F32x4,
        HostType::U32,
        HostType::U32x2,
        HostType::U32x3,
        HostType::U32x4,
        HostType::I32,
        HostType::I32x2,
        HostType::I32x3,
        HostType::I32x4,
        HostType::F64,
    ];

    /// Parse a schema type name such as `f32x4`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }

    /// The schema spelling of this type.
    pub fn name(self) -> &'static str {
        match self {
            HostType::F32 => "f32",
            HostType::F32x2 => "f32x2",
            HostType::F32x3 => "f32x3",
            HostType::F32x4 => "f32x4",
            HostType::U32 => "u32",
            HostType::U32x2 => "u32x2",
            HostType::U32x3 => "u32x3",
            HostType::U32x4 => "u32x4",
            HostType::I32 => "i32",
            HostType::I32x2 => "i32x2",
            HostType::I32x3 => "i32x3",
            HostType::I32x4 => "i32x4",
            HostType::F64 => "f64",
        }
    }

    pub fn scalar(self) -> ScalarKind {
        match self {
            HostType::F32 | HostType::F32x2 | HostType::F32x3 | HostType::F32x4 => ScalarKind::F32,
            HostType::U32 | HostType::U32x2 | HostType::U32x3 | HostType::U32x4 => ScalarKind::U32,
            HostType::I32 | HostType::I32x2 | HostType::I32x3 | HostType::I32x4 => ScalarKind::I32,
            HostType::F64 => ScalarKind::F64,
        }
    }

    pub fn components(self) -> u32 {
        match self {
            HostType::F32 | HostType::U32 | HostType::I32 | HostType::F64 => 1,
            HostType::F32x2 | HostType::U32x2 | HostType::I32x2 => 2,
            HostType::F32x3 | HostType::U32x3 | HostType::I32x3 => 3,
            HostType::F32x4 | HostType::U32x4 | HostType::I32x4 => 4,
        }
    }

    /// Host width in bytes. Equal to the device width for every mapped type.
    pub fn size(self) -> u32 {
        let scalar = match self.scalar() {
            ScalarKind::F64 => 8,
            _ => 4,
        };
        scalar * self.components()
    }

    /// WGSL spelling, or `None` when the device side has no equivalent.
    pub fn wgsl(self) -> Option<&'static str> {
        Some(match self {
            HostType::F32 => "f32",
            HostType::F32x2 => "vec2<f32>",
            HostType::F32x3 => "vec3<f32>",
            HostType::F32x4 => "vec4<f32>",
            HostType::U32 => "u32",
            HostType::U32x2 => "vec2<u32>",
            HostType::U32x3 => "vec3<u32>",
            HostType::U32x4 => "vec4<u32>",
            HostType::I32 => "i32",
            HostType::I32x2 => "vec2<i32>",
            HostType::I32x3 => "vec3<i32>",
            HostType::I32x4 => "vec4<i32>",
            HostType::F64 => return None,
        })
    }

    /// Alignment WGSL gives this type inside a host-shareable struct.
    pub fn device_align(self) -> Option<u32> {
        self.wgsl()?;
        Some(match self.components() {
            1 => 4,
            2 => 8,
            _ => 16,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_the_table() {
        for ty in HostType::ALL {
            assert_eq!(HostType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(HostType::from_name("f16"), None);
    }

    #[test]
    fn vec3_is_twelve_bytes_but_sixteen_aligned() {
        assert_eq!(HostType::F32x3.size(), 12);
        assert_eq!(HostType::F32x3.device_align(), Some(16));
        assert_eq!(HostType::U32x2.device_align(), Some(8));
        assert_eq!(HostType::I32.device_align(), Some(4));
    }

    #[test]
    fn f64_has_no_device_mapping() {
        assert_eq!(HostType::F64.size(), 8);
        assert_eq!(HostType::F64.wgsl(), None);
        assert_eq!(HostType::F64.device_align(), None);
    }
}
