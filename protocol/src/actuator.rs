//! The capability seam between a unit daemon and its CASU device.

/// Everything the protocol asks of a physical unit.
///
/// The unit daemon implements this once per device backend; the
/// timeline replay and the command handlers are written against the
/// trait so they can be exercised with recording fakes.
pub trait Actuator {
    /// Set the Peltier temperature reference.
    fn set_temperature_target(&mut self, celsius: f64) -> impl std::future::Future<Output = ()> + Send;

    /// Read the wax temperature sensor.
    fn read_temperature(&mut self) -> impl std::future::Future<Output = f64> + Send;

    /// Program the speaker with interleaved vibration/pause periods.
    /// The three slices must have equal length.
    fn set_vibration_pattern(
        &mut self,
        periods_ms: Vec<u32>,
        frequencies_hz: Vec<u32>,
        amplitudes: Vec<u32>,
    ) -> impl std::future::Future<Output = ()> + Send;

    fn speaker_standby(&mut self) -> impl std::future::Future<Output = ()> + Send;

    fn set_airflow(&mut self, intensity: f64) -> impl std::future::Future<Output = ()> + Send;

    fn airflow_standby(&mut self) -> impl std::future::Future<Output = ()> + Send;

    /// Drive the diagnostic LED, used as the visual blip marker.
    fn set_led(&mut self, r: f64, g: f64, b: f64) -> impl std::future::Future<Output = ()> + Send;

    fn led_standby(&mut self) -> impl std::future::Future<Output = ()> + Send;

    /// The IR proximity ring stays off so it does not show up in the
    /// background image.
    fn ir_standby(&mut self) -> impl std::future::Future<Output = ()> + Send;

    /// Release the device. Called exactly once, on Terminate or on a
    /// fatal signal.
    fn stop(&mut self) -> impl std::future::Future<Output = ()> + Send;
}

/// Return every actuator to its baseline: target temperature held,
/// LED/airflow/IR/speaker off. Used on Initialise, Standby and before
/// shutdown.
pub async fn standby_all<A: Actuator>(actuator: &mut A, temperature_target: f64) {
    actuator.set_temperature_target(temperature_target).await;
    actuator.led_standby().await;
    actuator.airflow_standby().await;
    actuator.ir_standby().await;
    actuator.speaker_standby().await;
}
