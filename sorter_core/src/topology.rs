//! Static track geometry: cart pitch, chute offsets, infeed drop point.
//!
//! Pure data plus lookups; everything dynamic (ring, positions, speed) lives
//! elsewhere.

use std::collections::BTreeMap;

use crate::error::BuildError;
use crate::types::ChuteId;
use crate::util::round_pitches;

#[derive(Debug, Clone)]
pub struct TrackTopology {
    cart_spacing_mm: u32,
    infeed_to_mainline_mm: u32,
    cart_offset_calibration: i32,
    min_ring_len: u32,
    chutes: BTreeMap<ChuteId, u32>,
    exception_chute: Option<ChuteId>,
}

impl TrackTopology {
    pub fn new(
        cart_spacing_mm: u32,
        infeed_to_mainline_mm: u32,
        cart_offset_calibration: i32,
        min_ring_len: u32,
        chutes: impl IntoIterator<Item = (ChuteId, u32)>,
        exception_chute: Option<ChuteId>,
    ) -> Result<Self, BuildError> {
        if cart_spacing_mm == 0 {
            return Err(BuildError::InvalidConfig("cart spacing must be > 0"));
        }
        if min_ring_len < 2 {
            return Err(BuildError::InvalidConfig("min ring length must be >= 2"));
        }
        let mut map = BTreeMap::new();
        for (chute, pitches) in chutes {
            if map.insert(chute, pitches).is_some() {
                return Err(BuildError::InvalidConfig("duplicate chute offset"));
            }
        }
        if let Some(exc) = exception_chute
            && !map.contains_key(&exc)
        {
            return Err(BuildError::InvalidConfig(
                "exception chute has no offset entry",
            ));
        }
        Ok(Self {
            cart_spacing_mm,
            infeed_to_mainline_mm,
            cart_offset_calibration,
            min_ring_len,
            chutes: map,
            exception_chute,
        })
    }

    pub fn cart_spacing_mm(&self) -> u32 {
        self.cart_spacing_mm
    }

    pub fn infeed_to_mainline_mm(&self) -> u32 {
        self.infeed_to_mainline_mm
    }

    pub fn min_ring_len(&self) -> u32 {
        self.min_ring_len
    }

    pub fn exception_chute(&self) -> Option<ChuteId> {
        self.exception_chute
    }

    /// Fixed cart pitches between the origin and the given chute.
    pub fn chute_offset(&self, chute: ChuteId) -> Option<u32> {
        self.chutes.get(&chute).copied()
    }

    pub fn chutes(&self) -> impl Iterator<Item = (ChuteId, u32)> + '_ {
        self.chutes.iter().map(|(c, p)| (*c, *p))
    }

    /// Signed pitch offset from the origin cart to the cart under the drop
    /// point: geometric distance rounded to whole pitches plus the
    /// calibration correction.
    pub fn infeed_offset_pitches(&self) -> i64 {
        round_pitches(self.infeed_to_mainline_mm, self.cart_spacing_mm)
            + i64::from(self.cart_offset_calibration)
    }

    pub fn pitches_to_mm(&self, pitches: u64) -> u64 {
        pitches * u64::from(self.cart_spacing_mm)
    }
}
