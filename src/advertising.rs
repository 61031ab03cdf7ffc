use crate::gatt::peripheral_event::AdvertisingFailure;
use crate::log_sink::{EventLog, NewEntry};
use crate::peripheral::advertisement::Advertisement;
use crate::peripheral::PeripheralServer;
use crate::{Error, ErrorType};
use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingPhase {
    Idle,
    /// Requested from the stack, not yet confirmed.
    Starting,
    Advertising,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingState {
    pub phase: AdvertisingPhase,
    pub last_error: Option<Error>,
}

/// Owns start/stop of the advertisement. `is_advertising` only turns true
/// once the stack confirms the start.
#[derive(Debug)]
pub struct AdvertisingController {
    advertisement: Advertisement,
    state: AdvertisingState,
    /// Bumped on every start request; only the latest one's result counts.
    generation: u64,
}

impl AdvertisingController {
    pub fn new(advertisement: Advertisement) -> Self {
        AdvertisingController {
            advertisement,
            state: AdvertisingState {
                phase: AdvertisingPhase::Idle,
                last_error: None,
            },
            generation: 0,
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.state.phase == AdvertisingPhase::Advertising
    }

    pub fn phase(&self) -> AdvertisingPhase {
        self.state.phase
    }

    pub fn state(&self) -> &AdvertisingState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn service_label(&self) -> String {
        self.advertisement
            .service_uuids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub async fn start(
        &mut self,
        backend: &mut dyn PeripheralServer,
        log: &EventLog,
    ) -> Result<(), Error> {
        if self.state.phase != AdvertisingPhase::Idle {
            let err = Error::redundant(format!("advertising already {:?}", self.state.phase));
            warn!("start advertising ignored: {}", err);
            log.append(NewEntry::info("Already advertising"));
            return Ok(());
        }

        self.generation += 1;
        let result = match check_radio(backend).await {
            Ok(()) => {
                backend
                    .start_advertising(&self.advertisement, self.generation)
                    .await
            }
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => {
                debug!(
                    "advertising request {} for {}",
                    self.generation,
                    self.service_label()
                );
                self.state.phase = AdvertisingPhase::Starting;
                Ok(())
            }
            Err(err) => {
                log.append(
                    NewEntry::error("Advertising failed").detail(err.description.clone()),
                );
                self.state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Applies the stack's verdict on the pending start. Results for any
    /// earlier request are dropped.
    pub fn on_started(
        &mut self,
        generation: u64,
        error: Option<AdvertisingFailure>,
        log: &EventLog,
    ) {
        if self.state.phase != AdvertisingPhase::Starting || generation != self.generation {
            debug!(
                "advertising result {} {:?} ignored in phase {:?} (current request {})",
                generation, error, self.state.phase, self.generation
            );
            return;
        }
        match error {
            None => {
                self.state.phase = AdvertisingPhase::Advertising;
                self.state.last_error = None;
                log.append(
                    NewEntry::info("Advertising started")
                        .detail(self.service_label())
                        .enhanced(),
                );
            }
            Some(failure) => {
                self.state.phase = AdvertisingPhase::Idle;
                log.append(
                    NewEntry::error(format!("Advertising failed: {}", failure.code))
                        .detail(failure.reason.clone()),
                );
                self.state.last_error = Some(Error::new(
                    "advertising failed",
                    failure.reason,
                    ErrorType::AdvertisingFailed { code: failure.code },
                ));
            }
        }
    }

    pub async fn stop(
        &mut self,
        backend: &mut dyn PeripheralServer,
        log: &EventLog,
    ) -> Result<(), Error> {
        if self.state.phase == AdvertisingPhase::Idle {
            warn!("stop advertising ignored: {}", Error::redundant("not advertising"));
            log.append(NewEntry::info("Not advertising"));
            return Ok(());
        }
        if let Err(err) = backend.stop_advertising().await {
            log.append(NewEntry::error("Stop advertising failed").detail(err.description.clone()));
            self.state.last_error = Some(err.clone());
            return Err(err);
        }
        self.state.phase = AdvertisingPhase::Idle;
        log.append(
            NewEntry::info("Advertising stopped")
                .detail(self.service_label())
                .enhanced(),
        );
        Ok(())
    }

    /// The radio went away underneath us; whatever was on the air is gone.
    pub fn on_power_lost(&mut self, log: &EventLog) {
        if self.state.phase == AdvertisingPhase::Idle {
            return;
        }
        self.state.phase = AdvertisingPhase::Idle;
        self.state.last_error = Some(Error::from_type(ErrorType::RadioUnavailable));
        log.append(NewEntry::warning("Advertising interrupted").detail("radio powered off"));
    }
}

pub(crate) async fn check_radio(backend: &dyn PeripheralServer) -> Result<(), Error> {
    if !backend.is_authorized().await? {
        return Err(Error::new(
            "permission denied",
            "bluetooth permission not granted",
            ErrorType::PermissionDenied,
        ));
    }
    if !backend.is_powered().await? {
        return Err(Error::new(
            "radio unavailable",
            "bluetooth radio is powered off",
            ErrorType::RadioUnavailable,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::peripheral_event::PeripheralEvent;
    use crate::log_sink::Severity;
    use crate::peripheral::advertisement::AdvertiseSettings;
    use crate::peripheral::loopback::LoopbackPeripheral;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn controller() -> AdvertisingController {
        AdvertisingController::new(Advertisement {
            local_name: None,
            service_uuids: vec![Uuid::from_u128(0xA)],
            settings: AdvertiseSettings::default(),
        })
    }

    #[tokio::test]
    async fn start_is_confirmed_by_the_stack() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        let log = EventLog::unbounded();
        let mut adv = controller();

        adv.start(&mut backend, &log).await.unwrap();
        assert_eq!(adv.phase(), AdvertisingPhase::Starting);
        assert!(!adv.is_advertising());
        assert!(log.is_empty());

        match rx.recv().await {
            Some(PeripheralEvent::AdvertisingStarted { generation, error }) => {
                adv.on_started(generation, error, &log)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(adv.is_advertising());
        let entries = log.snapshot();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].to_string().contains(&Uuid::from_u128(0xA).to_string()));
        assert!(entries[0].enhanced);
    }

    #[tokio::test]
    async fn failure_reverts_to_idle() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        backend.central().fail_next_advertising(1, "data too large");
        let log = EventLog::unbounded();
        let mut adv = controller();

        adv.start(&mut backend, &log).await.unwrap();
        if let Some(PeripheralEvent::AdvertisingStarted { generation, error }) = rx.recv().await {
            adv.on_started(generation, error, &log);
        }
        assert_eq!(adv.phase(), AdvertisingPhase::Idle);
        assert_eq!(
            adv.state().last_error.as_ref().map(|e| e.error_type.clone()),
            Some(ErrorType::AdvertisingFailed { code: 1 })
        );
        let entry = log.snapshot().pop().unwrap();
        assert_eq!(entry.severity, Severity::Error);
        assert_eq!(entry.text, "Advertising failed: 1");
    }

    #[tokio::test]
    async fn missing_permission_leaves_state_unchanged() {
        let (tx, _rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        backend.central().set_authorized(false);
        let log = EventLog::unbounded();
        let mut adv = controller();

        let err = adv.start(&mut backend, &log).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::PermissionDenied);
        assert_eq!(adv.phase(), AdvertisingPhase::Idle);
        assert!(log.snapshot()[0].is_error());
    }

    #[tokio::test]
    async fn redundant_calls_are_informational_no_ops() {
        let (tx, _rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        let central = backend.central();
        let log = EventLog::unbounded();
        let mut adv = controller();

        adv.stop(&mut backend, &log).await.unwrap();
        adv.start(&mut backend, &log).await.unwrap();
        adv.start(&mut backend, &log).await.unwrap();
        assert_eq!(central.advertising_requests(), 1);
        assert!(log
            .snapshot()
            .iter()
            .all(|e| e.severity == Severity::Info));
    }

    #[tokio::test]
    async fn stale_confirmation_after_stop_is_ignored() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        let log = EventLog::unbounded();
        let mut adv = controller();

        adv.start(&mut backend, &log).await.unwrap();
        adv.stop(&mut backend, &log).await.unwrap();
        if let Some(PeripheralEvent::AdvertisingStarted { generation, error }) = rx.recv().await {
            adv.on_started(generation, error, &log);
        }
        assert!(!adv.is_advertising());
    }

    #[tokio::test]
    async fn late_success_does_not_confirm_a_newer_start() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut backend = LoopbackPeripheral::new(tx);
        let central = backend.central();
        let log = EventLog::unbounded();
        let mut adv = controller();

        adv.start(&mut backend, &log).await.unwrap();
        adv.stop(&mut backend, &log).await.unwrap();
        central.fail_next_advertising(AdvertisingFailure::TOO_MANY_ADVERTISERS, "no free slot");
        adv.start(&mut backend, &log).await.unwrap();
        assert_eq!(adv.generation(), 2);

        // First request's success, then the second request's failure.
        for _ in 0..2 {
            match rx.recv().await {
                Some(PeripheralEvent::AdvertisingStarted { generation, error }) => {
                    adv.on_started(generation, error, &log)
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(!adv.is_advertising());
        assert_eq!(adv.phase(), AdvertisingPhase::Idle);
        assert_eq!(central.active_advertisements(), 0);
        assert_eq!(
            log.snapshot().pop().unwrap().to_string(),
            "Advertising failed: 2: no free slot"
        );
    }
}
