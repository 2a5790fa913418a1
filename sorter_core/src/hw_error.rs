//! Mapping of boxed port errors onto the typed core taxonomy.

use crate::error::SorterError;

// Map any error to a typed SorterError, with special handling for hardware
// errors when the `hardware-errors` feature is enabled.
pub(crate) fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> SorterError {
    #[cfg(feature = "hardware-errors")]
    {
        use sorter_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => SorterError::Timeout,
                HwError::NotReady => SorterError::HardwareFault("port not ready".to_string()),
                other => SorterError::HardwareFault(other.to_string()),
            };
        }
    }
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        SorterError::Timeout
    } else {
        SorterError::Hardware(s)
    }
}
