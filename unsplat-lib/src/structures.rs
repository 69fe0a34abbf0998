/// One decoded Gaussian in the layout of the standard 3DGS PLY.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Splat {
    pub position: [f32; 3],
    pub sh_dc: [f32; 3],
    pub opacity: f32,
    pub scale: [f32; 3],
    /// `(w, x, y, z)`, written as `rot_0..rot_3`.
    pub rotation: [f32; 4],
}

impl Splat {
    pub const FLOATS: usize = 14;

    /// Flattens the splat in `x, y, z, f_dc_0..2, opacity, scale_0..2, rot_0..3`
    /// order.
    pub fn to_array(&self) -> [f32; Self::FLOATS] {
        let [x, y, z] = self.position;
        let [r, g, b] = self.sh_dc;
        let [s0, s1, s2] = self.scale;
        let [w, qx, qy, qz] = self.rotation;
        [x, y, z, r, g, b, self.opacity, s0, s1, s2, w, qx, qy, qz]
    }
}

/// Axis-aligned dequantization range.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Bounds3 {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds3 {
    /// Maps unit values into the range, in double precision.
    #[inline]
    pub fn expand(&self, v: [f64; 3]) -> [f64; 3] {
        std::array::from_fn(|i| {
            crate::common::dequant_linear(v[i], f64::from(self.min[i]), f64::from(self.max[i]))
        })
    }
}

/// Bounds shared by 256 consecutive splats of a compressed PLY.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Chunk {
    pub position: Bounds3,
    pub scale: Bounds3,
    pub color: Option<Bounds3>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PackedVertex {
    pub position: u32,
    pub rotation: u32,
    pub scale: u32,
    pub color: u32,
}

pub type Rgba = [u8; 4];
