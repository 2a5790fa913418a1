//! Test and helper mocks for sorter_core

/// A drive that always errors on feedback reads; useful when exercising the
/// control loop's degraded path or when feedback comes from elsewhere.
pub struct NoopDrive;

impl sorter_traits::Drive for NoopDrive {
    fn set_target_speed(
        &mut self,
        _mmps: f64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    fn current_speed(
        &mut self,
        _timeout: std::time::Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("noop drive")))
    }

    fn is_ready(&mut self) -> bool {
        false
    }
}
