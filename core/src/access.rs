//! Registry key access rights.

use bitflags::bitflags;

bitflags! {
    /// Access mask requested when opening or creating a key.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const QUERY_VALUE = 0x0001;
        const SET_VALUE = 0x0002;
        const CREATE_SUB_KEY = 0x0004;
        const ENUMERATE_SUB_KEYS = 0x0008;
        const NOTIFY = 0x0010;
        const CREATE_LINK = 0x0020;
        const DELETE = 0x0001_0000;
        const READ_CONTROL = 0x0002_0000;
        const WRITE_DAC = 0x0004_0000;
        const WRITE_OWNER = 0x0008_0000;

        const READ = Self::READ_CONTROL.bits()
            | Self::QUERY_VALUE.bits()
            | Self::ENUMERATE_SUB_KEYS.bits()
            | Self::NOTIFY.bits();
        const WRITE = Self::READ_CONTROL.bits()
            | Self::SET_VALUE.bits()
            | Self::CREATE_SUB_KEY.bits();
        const ALL_ACCESS = 0x000F_003F;
    }
}

impl Access {
    /// Returns true if the mask grants any right that modifies the key.
    pub fn is_modifying(&self) -> bool {
        self.intersects(
            Access::SET_VALUE
                | Access::CREATE_SUB_KEY
                | Access::CREATE_LINK
                | Access::DELETE
                | Access::WRITE_DAC
                | Access::WRITE_OWNER,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_masks_match_native_values() {
        assert_eq!(Access::READ.bits(), 0x0002_0019);
        assert_eq!(Access::WRITE.bits(), 0x0002_0006);
        assert!(Access::ALL_ACCESS.contains(Access::READ | Access::WRITE | Access::DELETE));
    }

    #[test]
    fn test_is_modifying() {
        assert!(!Access::READ.is_modifying());
        assert!(Access::SET_VALUE.is_modifying());
        assert!(Access::ALL_ACCESS.is_modifying());
    }
}
