//! Bus / physical address translation.
//!
//! The GPU and the ARM cores see the same memory at different addresses. A bus address is the
//! physical address plus a fixed, board-specific offset (`0xC000_0000` on BCM2836/7, which
//! selects the L2-bypassing alias).

pub const PAGE_SIZE: u32 = 4096;

/// Bus offset of the reference board (BCM2836/7).
pub const REFERENCE_BUS_OFFSET: u32 = 0xC000_0000;

/// An address as seen by the GPU and the firmware.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusAddress(pub u32);

/// An address as seen by the ARM cores before MMU translation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysAddress(pub u32);

impl BusAddress {
    pub const NULL: BusAddress = BusAddress(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `self + bytes`. Panics on 32-bit overflow.
    pub fn offset_by(self, bytes: u32) -> BusAddress {
        BusAddress(
            self.0
                .checked_add(bytes)
                .unwrap_or_else(|| panic!("bus address 0x{:08x} + 0x{bytes:x} overflows", self.0)),
        )
    }
}

impl PhysAddress {
    /// Start of the page containing this address.
    pub fn page_base(self) -> PhysAddress {
        PhysAddress(self.0 - self.page_offset())
    }

    /// Byte offset of this address within its page.
    pub fn page_offset(self) -> u32 {
        self.0 % PAGE_SIZE
    }
}

/// Translation between bus and physical addresses for one board.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusTranslation {
    offset: u32,
}

impl Default for BusTranslation {
    fn default() -> Self {
        Self::REFERENCE
    }
}

impl BusTranslation {
    pub const REFERENCE: BusTranslation = BusTranslation::new(REFERENCE_BUS_OFFSET);

    pub const fn new(offset: u32) -> Self {
        Self { offset }
    }

    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// # Panics
    ///
    /// Panics if `bus` lies below the bus offset; such an address does not name ARM-visible
    /// memory on this board.
    pub fn bus_to_phys(&self, bus: BusAddress) -> PhysAddress {
        assert!(
            bus.0 >= self.offset,
            "bus address 0x{:08x} is below the bus offset 0x{:08x}",
            bus.0,
            self.offset
        );
        PhysAddress(bus.0 - self.offset)
    }

    /// # Panics
    ///
    /// Panics if the translated address does not fit in 32 bits.
    pub fn phys_to_bus(&self, phys: PhysAddress) -> BusAddress {
        let bus = phys.0.checked_add(self.offset).unwrap_or_else(|| {
            panic!(
                "physical address 0x{:08x} has no bus alias above 0x{:08x}",
                phys.0, self.offset
            )
        });
        BusAddress(bus)
    }
}

/// Splits `[addr, addr + len)` into a page-aligned window: `(aligned_base, intra_page_offset,
/// window_len)`, where `window_len` covers the whole range rounded up to whole pages.
pub fn page_window(addr: u64, len: usize) -> (u64, usize, usize) {
    let page = u64::from(PAGE_SIZE);
    let offset = (addr % page) as usize;
    let base = addr - offset as u64;
    let window = (offset + len).div_ceil(PAGE_SIZE as usize) * PAGE_SIZE as usize;
    (base, offset, window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reference_translation_strips_the_alias() {
        let t = BusTranslation::REFERENCE;
        assert_eq!(t.bus_to_phys(BusAddress(0xFE12_3000)), PhysAddress(0x3E12_3000));
        assert_eq!(t.phys_to_bus(PhysAddress(0x3E12_3000)), BusAddress(0xFE12_3000));
    }

    #[test]
    #[should_panic(expected = "below the bus offset")]
    fn bus_below_offset_is_rejected() {
        BusTranslation::REFERENCE.bus_to_phys(BusAddress(0x3E00_0000));
    }

    #[test]
    #[should_panic(expected = "has no bus alias")]
    fn phys_without_alias_is_rejected() {
        BusTranslation::REFERENCE.phys_to_bus(PhysAddress(0x4000_0000));
    }

    #[test]
    fn page_window_covers_ranges_that_cross_pages() {
        assert_eq!(page_window(0x1000, 16), (0x1000, 0, 4096));
        assert_eq!(page_window(0x1ff0, 32), (0x1000, 0xff0, 8192));
        assert_eq!(page_window(0x3F00_0000, 0x0100_0000), (0x3F00_0000, 0, 0x0100_0000));
    }

    #[test]
    fn phys_page_helpers() {
        let p = PhysAddress(0x0010_2345);
        assert_eq!(p.page_base(), PhysAddress(0x0010_2000));
        assert_eq!(p.page_offset(), 0x345);
    }

    proptest! {
        #[test]
        fn bus_phys_bus_round_trips(offset in any::<u32>(), delta in any::<u32>()) {
            let t = BusTranslation::new(offset);
            let bus = BusAddress(offset.saturating_add(delta));
            prop_assert_eq!(t.phys_to_bus(t.bus_to_phys(bus)), bus);
        }

        #[test]
        fn reference_round_trip_for_valid_bus_addresses(bus in REFERENCE_BUS_OFFSET..=u32::MAX) {
            let t = BusTranslation::REFERENCE;
            prop_assert_eq!(t.phys_to_bus(t.bus_to_phys(BusAddress(bus))), BusAddress(bus));
        }

        #[test]
        fn page_window_contains_the_range(addr in 0u64..(1 << 32), len in 1usize..(1 << 20)) {
            let (base, offset, window) = page_window(addr, len);
            prop_assert_eq!(base % u64::from(PAGE_SIZE), 0);
            prop_assert_eq!(base + offset as u64, addr);
            prop_assert!(offset + len <= window);
            prop_assert_eq!(window % PAGE_SIZE as usize, 0);
        }
    }
}
