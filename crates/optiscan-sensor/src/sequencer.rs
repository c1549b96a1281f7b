//! Enroll, verify, search and delete procedures.
//!
//! Each procedure is a fixed run of commands. Every step sends one command
//! and waits for its event; a step that does not get the wanted event ends
//! the attempt, and the next attempt starts over from the first capture.
//! A procedure has one budget of `max_attempts` attempts shared by all its
//! steps. Running out ends the procedure with
//! [`SensorError::RetriesExhausted`] and dispatches the procedure's failure
//! event (`EnrollFailed`, `VerifyFailed`, `SearchFailed`, `DeleteFailed`).
//!
//! Waiting for a finger (`NoFinger` polling) does not use up attempts until
//! the finger timeout expires.
//!
//! Enrollment:
//!
//! ```text
//! GenImg ─> Img2Tz(1) ─> [finger lifted] ─> GenImg ─> Img2Tz(2)
//!   ─> Search(1) ─┬─ match ──> EnrollComplete { duplicate: true }
//!                 └─ none ───> RegModel ─> Store(1, page) ─> EnrollComplete
//! ```
//!
//! A failed `RegModel` (the captures did not combine) restarts the
//! enrollment from the first capture.

use std::future::Future;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use optiscan_core::{
    ConfirmationCode,
    constants::{CHAR_BUFFER_1, CHAR_BUFFER_2},
};
use optiscan_hardware::Transport;
use optiscan_protocol::{Command, Opcode};

use crate::error::{Procedure, Result, SensorError};
use crate::event::{EnrollmentResult, Event, EventKind, MatchInfo};
use crate::sensor::Sensor;

/// Outcome of one attempt at a step.
enum Attempt<R> {
    Done(R),
    /// The module answered, but not with the wanted event.
    Retry(Event),
}

enum Enrolled {
    Stored,
    Duplicate(MatchInfo),
}

impl Procedure {
    fn failure_kind(self) -> EventKind {
        match self {
            Self::Enroll => EventKind::EnrollFailed,
            Self::Verify => EventKind::VerifyFailed,
            Self::Search => EventKind::SearchFailed,
            Self::Delete => EventKind::DeleteFailed,
        }
    }

    fn final_opcode(self) -> Opcode {
        match self {
            Self::Enroll => Opcode::Store,
            Self::Verify => Opcode::Match,
            Self::Search => Opcode::Search,
            Self::Delete => Opcode::DeletChar,
        }
    }
}

impl<T: Transport> Sensor<T> {
    /// Enroll a finger as `template_id`.
    ///
    /// If the finger already matches a stored template nothing is stored and
    /// the result reports `duplicate` with the existing template id.
    ///
    /// # Errors
    /// - `SensorError::RetriesExhausted` when a step keeps failing.
    /// - `SensorError::InvalidTemplateId` if `template_id` is below the id base.
    pub async fn enroll(&self, template_id: u16) -> Result<EnrollmentResult> {
        let _guard = self.procedure_lock.lock().await;
        let page_id = self.page_id(template_id)?;
        info!(template_id, page_id, "Enrollment started");

        let (enrolled, attempts) = self
            .retry(Procedure::Enroll, move || self.enroll_once(page_id))
            .await?;

        let (result, status) = match enrolled {
            Enrolled::Stored => (
                EnrollmentResult {
                    template_id,
                    duplicate: false,
                    attempts,
                },
                ConfirmationCode::Ok,
            ),
            Enrolled::Duplicate(info) => (
                EnrollmentResult {
                    template_id: info.template_id.unwrap_or(template_id),
                    duplicate: true,
                    attempts,
                },
                ConfirmationCode::AlreadyExists,
            ),
        };

        info!(
            template_id = result.template_id,
            duplicate = result.duplicate,
            attempts = result.attempts,
            "Enrollment finished"
        );
        self.shared.dispatcher.dispatch(&Event::synthetic(
            Opcode::Store.as_u8(),
            status,
            EventKind::EnrollComplete(result),
        ));
        Ok(result)
    }

    /// Check a live finger against the stored template `template_id`.
    ///
    /// # Errors
    /// `SensorError::RetriesExhausted` if the finger never matches.
    pub async fn verify(&self, template_id: u16) -> Result<MatchInfo> {
        let _guard = self.procedure_lock.lock().await;
        let page_id = self.page_id(template_id)?;
        debug!(template_id, "Verification started");

        // The stored template stays in buffer 2 across attempts.
        let loaded = AtomicBool::new(false);
        let loaded = &loaded;

        let (info, attempts) = self
            .retry(Procedure::Verify, move || async move {
                if !loaded.load(Ordering::Acquire) {
                    let event = self
                        .execute(Command::LoadChar {
                            buffer: CHAR_BUFFER_2,
                            page_id,
                        })
                        .await?;
                    if event.kind != EventKind::TemplateLoaded {
                        return Ok(Attempt::Retry(event));
                    }
                    loaded.store(true, Ordering::Release);
                }

                if let Attempt::Retry(event) = self.capture_once(CHAR_BUFFER_1).await? {
                    return Ok(Attempt::Retry(event));
                }
                let event = self.execute(Command::Match).await?;
                Ok(match event.kind {
                    EventKind::MatchFound(info) => Attempt::Done(MatchInfo {
                        page_id: Some(page_id),
                        template_id: Some(template_id),
                        score: info.score,
                    }),
                    _ => Attempt::Retry(event),
                })
            })
            .await?;

        info!(template_id, score = info.score, attempts, "Finger verified");
        Ok(info)
    }

    /// Identify a live finger against the whole library.
    ///
    /// # Errors
    /// `SensorError::RetriesExhausted` if no stored template matches.
    pub async fn search(&self) -> Result<MatchInfo> {
        let _guard = self.procedure_lock.lock().await;
        let page_count = self.library_capacity().await?;
        debug!(page_count, "Search started");

        let (info, attempts) = self
            .retry(Procedure::Search, move || async move {
                if let Attempt::Retry(event) = self.capture_once(CHAR_BUFFER_1).await? {
                    return Ok(Attempt::Retry(event));
                }
                let event = self
                    .execute(Command::Search {
                        buffer: CHAR_BUFFER_1,
                        start_page: 0,
                        page_count,
                    })
                    .await?;
                Ok(match event.kind {
                    EventKind::MatchFound(info) => Attempt::Done(info),
                    _ => Attempt::Retry(event),
                })
            })
            .await?;

        info!(template_id = ?info.template_id, score = info.score, attempts, "Finger identified");
        Ok(info)
    }

    /// Delete `count` templates starting at `template_id`.
    pub async fn delete(&self, template_id: u16, count: u16) -> Result<()> {
        let _guard = self.procedure_lock.lock().await;
        let page_id = self.page_id(template_id)?;

        let ((), attempts) = self
            .retry(Procedure::Delete, move || async move {
                let event = self.execute(Command::DeletChar { page_id, count }).await?;
                Ok(match event.kind {
                    EventKind::TemplateDeleted => Attempt::Done(()),
                    _ => Attempt::Retry(event),
                })
            })
            .await?;

        info!(template_id, count, attempts, "Templates deleted");
        Ok(())
    }

    /// Library size used by `search`.
    ///
    /// Taken from the configuration, or read once from the module and cached.
    pub async fn library_capacity(&self) -> Result<u16> {
        let cached = *self
            .library_capacity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match cached {
            Some(capacity) => Ok(capacity),
            None => Ok(self.read_system_parameters().await?.library_capacity),
        }
    }

    /// Override the library size used by `search`.
    pub fn set_library_capacity(&self, capacity: u16) {
        *self
            .library_capacity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(capacity);
    }

    fn page_id(&self, template_id: u16) -> Result<u16> {
        let base = self.config.template_id_base;
        template_id
            .checked_sub(base)
            .ok_or(SensorError::InvalidTemplateId { template_id, base })
    }

    async fn enroll_once(&self, page_id: u16) -> Result<Attempt<Enrolled>> {
        if let Attempt::Retry(event) = self.capture_once(CHAR_BUFFER_1).await? {
            return Ok(Attempt::Retry(event));
        }
        self.wait_for_removal().await?;
        if let Attempt::Retry(event) = self.capture_once(CHAR_BUFFER_2).await? {
            return Ok(Attempt::Retry(event));
        }

        let page_count = self.library_capacity().await?;
        let event = self
            .execute(Command::Search {
                buffer: CHAR_BUFFER_1,
                start_page: 0,
                page_count,
            })
            .await?;
        match event.kind {
            EventKind::MatchFound(info) => {
                warn!(existing = ?info.template_id, "Finger already enrolled");
                return Ok(Attempt::Done(Enrolled::Duplicate(info)));
            }
            EventKind::MatchFailed => {}
            _ => return Ok(Attempt::Retry(event)),
        }

        let event = self.execute(Command::RegModel).await?;
        if event.kind != EventKind::ModelCreated {
            return Ok(Attempt::Retry(event));
        }

        let event = self
            .execute(Command::Store {
                buffer: CHAR_BUFFER_1,
                page_id,
            })
            .await?;
        Ok(match event.kind {
            EventKind::TemplateStored => Attempt::Done(Enrolled::Stored),
            _ => Attempt::Retry(event),
        })
    }

    /// Capture a finger into character buffer `buffer`.
    async fn capture_once(&self, buffer: u8) -> Result<Attempt<()>> {
        let deadline = Instant::now() + self.config.retry.finger_timeout();

        loop {
            let event = self.execute(Command::GenImg).await?;
            match event.kind {
                EventKind::ImageCaptured => break,
                EventKind::NoFinger if Instant::now() < deadline => {
                    sleep(self.config.retry.finger_poll_interval()).await;
                }
                _ => return Ok(Attempt::Retry(event)),
            }
        }

        let event = self.execute(Command::Img2Tz { buffer }).await?;
        Ok(match event.kind {
            EventKind::FeatureExtracted => Attempt::Done(()),
            _ => Attempt::Retry(event),
        })
    }

    /// Poll until the sensor is empty, giving up quietly at the finger timeout.
    async fn wait_for_removal(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.retry.finger_timeout();

        loop {
            let event = self.execute(Command::GenImg).await?;
            if event.kind == EventKind::NoFinger {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("Finger not lifted between captures");
                return Ok(());
            }
            sleep(self.config.retry.finger_poll_interval()).await;
        }
    }

    /// Run `step` until it succeeds or the procedure's attempt budget runs out.
    ///
    /// Transient errors count as failed attempts; any other error ends the
    /// procedure at once.
    async fn retry<R, F, Fut>(&self, procedure: Procedure, mut step: F) -> Result<(R, u8)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<R>>>,
    {
        let max_attempts = self.config.retry.max_attempts;
        let mut last = (
            procedure.final_opcode().as_u8(),
            ConfirmationCode::PacketReceiveError,
        );

        for attempt in 1..=max_attempts {
            match step().await {
                Ok(Attempt::Done(value)) => return Ok((value, attempt)),
                Ok(Attempt::Retry(event)) => {
                    debug!(
                        %procedure,
                        attempt,
                        command = event.command,
                        status = %event.status,
                        event = event.kind.name(),
                        "Step failed"
                    );
                    last = (event.command, event.status);
                }
                Err(e) if e.is_retryable() => {
                    warn!(%procedure, attempt, error = %e, "Step error");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(%procedure, attempts = max_attempts, "Retries exhausted");
        let (command, status) = last;
        self.shared.dispatcher.dispatch(&Event::synthetic(
            command,
            status,
            procedure.failure_kind(),
        ));
        Err(SensorError::RetriesExhausted {
            procedure,
            attempts: max_attempts,
        })
    }
}
