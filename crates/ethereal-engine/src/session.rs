use std::sync::{Arc, Mutex, MutexGuard};

use ethereal_contracts::chat::{
    Directive, EditIntentClassifier, EditPreset, KeywordEditClassifier,
};
use ethereal_contracts::events::{EventPayload, SessionLog};
use ethereal_contracts::session::{ConversationState, ImageHandle, Message, Phase};
use serde_json::{json, Value};

use crate::credential::{Credential, CredentialState};
use crate::dispatch::{plan_dispatch, DispatchPlan};
use crate::prompts::upload_announcement;
use crate::StudioBackend;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no Gemini API key set; enter one to start the consultation")]
    MissingCredential,
}

/// What happened on the image side of a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    NotRequested,
    Generated { directive: Directive },
    Edited { instruction: String },
    /// The service answered but produced no image.
    NoImage,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input without photos.
    Ignored,
    /// The chat call failed; only the user message was recorded.
    ChatFailed { error: String },
    Replied { reply: String, image: ImageOutcome },
}

struct Shared {
    state: ConversationState,
    in_flight: usize,
}

/// Owns the conversation and drives each turn through chat, extraction and
/// image dispatch.
///
/// State lives behind a lock that is never held across a backend call; each
/// step swaps in a complete new `ConversationState`. Overlapping calls (an
/// upload while a chat is outstanding) are allowed and their images land in
/// completion order.
pub struct ConsultantSession {
    backend: Arc<dyn StudioBackend>,
    classifier: Box<dyn EditIntentClassifier>,
    credential: Mutex<CredentialState>,
    shared: Mutex<Shared>,
    log: SessionLog,
}

/// Keeps `busy` raised for as long as it lives.
struct BusyGuard<'a> {
    session: &'a ConsultantSession,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut shared = self.session.lock_shared();
        shared.in_flight = shared.in_flight.saturating_sub(1);
        let busy = shared.in_flight > 0;
        let current = std::mem::replace(&mut shared.state, ConversationState::empty());
        shared.state = current.with_busy(busy);
    }
}

impl ConsultantSession {
    pub fn new(backend: Arc<dyn StudioBackend>, log: SessionLog) -> Self {
        Self::with_state(backend, log, ConversationState::new())
    }

    pub fn with_state(
        backend: Arc<dyn StudioBackend>,
        log: SessionLog,
        state: ConversationState,
    ) -> Self {
        Self {
            backend,
            classifier: Box::new(KeywordEditClassifier::default()),
            credential: Mutex::new(CredentialState::Absent),
            shared: Mutex::new(Shared {
                state,
                in_flight: 0,
            }),
            log,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn EditIntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn set_credential(&self, credential: Credential) {
        *self.lock_credential() = CredentialState::Set(credential);
        self.record("credential_set", EventPayload::new());
    }

    pub fn clear_credential(&self) {
        *self.lock_credential() = CredentialState::Absent;
        self.record("credential_cleared", EventPayload::new());
    }

    pub fn has_credential(&self) -> bool {
        self.lock_credential().is_set()
    }

    pub fn snapshot(&self) -> ConversationState {
        self.lock_shared().state.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.lock_shared().state.is_busy()
    }

    pub fn set_phase(&self, phase: Phase) -> Phase {
        self.apply(|state| state.with_phase(phase)).phase()
    }

    pub fn send_message(&self, text: &str) -> Result<TurnOutcome, SessionError> {
        self.run_turn(text, Vec::new())
    }

    /// Stores the photos as references and immediately runs a turn that
    /// shows them to the consultant.
    pub fn upload_photos(&self, photos: Vec<ImageHandle>) -> Result<TurnOutcome, SessionError> {
        if photos.is_empty() {
            return Ok(TurnOutcome::Ignored);
        }
        let announcement = upload_announcement(photos.len());
        self.run_turn(&announcement, photos)
    }

    /// Edits the latest concept directly, bypassing the chat.
    pub fn edit_latest(&self, instruction: &str) -> Result<ImageOutcome, SessionError> {
        let credential = self.require_credential()?;
        let instruction = instruction.trim();
        let Some(base) = self.snapshot().assets().latest().cloned() else {
            return Ok(ImageOutcome::NotRequested);
        };
        if instruction.is_empty() {
            return Ok(ImageOutcome::NotRequested);
        }
        Ok(self.execute(
            &credential,
            DispatchPlan::Edit {
                base,
                instruction: instruction.to_string(),
            },
        ))
    }

    pub fn apply_preset(&self, preset: EditPreset) -> Result<ImageOutcome, SessionError> {
        self.edit_latest(preset.instruction())
    }

    fn run_turn(&self, text: &str, images: Vec<ImageHandle>) -> Result<TurnOutcome, SessionError> {
        if text.trim().is_empty() && images.is_empty() {
            return Ok(TurnOutcome::Ignored);
        }
        let credential = self.require_credential()?;

        let message = Message::user_with_images(text, images.clone());
        let _busy = self.begin_call(|state| {
            if message.images.is_empty() {
                state.with_message(message)
            } else {
                state.with_upload(message)
            }
        });
        let history = self.snapshot().messages().to_vec();
        self.record(
            "message_sent",
            event(json!({
                "images": images.len(),
                "history_len": history.len(),
            })),
        );

        let reply = match self.backend.chat(&credential, &history, &images) {
            Ok(reply) => reply,
            Err(err) => {
                let error = format!("{err:#}");
                tracing::error!(backend = self.backend.name(), %error, "chat failed");
                self.record(
                    "chat_failed",
                    event(json!({ "error": error, "history_len": history.len() })),
                );
                return Ok(TurnOutcome::ChatFailed { error });
            }
        };

        let state = self.apply(|state| state.with_message(Message::assistant(reply.clone())));
        self.record(
            "reply_received",
            event(json!({ "chars": reply.chars().count() })),
        );

        let plan = plan_dispatch(&reply, text, &state, self.classifier.as_ref());
        let image = self.execute(&credential, plan);
        Ok(TurnOutcome::Replied { reply, image })
    }

    fn execute(&self, credential: &Credential, plan: DispatchPlan) -> ImageOutcome {
        let kind = plan.kind();
        match plan {
            DispatchPlan::Conversational => ImageOutcome::NotRequested,
            DispatchPlan::Generate {
                directive,
                references,
            } => {
                let result = {
                    let _busy = self.begin_call(|state| state);
                    let result = self.backend.generate_image(
                        credential,
                        &directive.visual_prompt,
                        &references,
                    );
                    if let Ok(Some(image)) = &result {
                        let image = image.clone();
                        self.apply(|state| state.with_generated(image));
                    }
                    result
                };
                match result {
                    Ok(Some(_)) => {
                        self.record(
                            "image_generated",
                            event(json!({
                                "scene_summary": directive.scene_summary,
                                "references": references.len(),
                            })),
                        );
                        ImageOutcome::Generated { directive }
                    }
                    Ok(None) => self.no_image(kind),
                    Err(err) => self.dispatch_failed(kind, &err),
                }
            }
            DispatchPlan::Edit { base, instruction } => {
                let result = {
                    let _busy = self.begin_call(|state| state);
                    let result = self.backend.edit_image(credential, &base, &instruction);
                    if let Ok(Some(image)) = &result {
                        let image = image.clone();
                        self.apply(|state| state.with_edited(image));
                    }
                    result
                };
                match result {
                    Ok(Some(_)) => {
                        self.record(
                            "image_edited",
                            event(json!({ "instruction": instruction })),
                        );
                        ImageOutcome::Edited { instruction }
                    }
                    Ok(None) => self.no_image(kind),
                    Err(err) => self.dispatch_failed(kind, &err),
                }
            }
        }
    }

    fn no_image(&self, kind: &str) -> ImageOutcome {
        tracing::info!(kind, "backend returned no image");
        self.record("image_absent", event(json!({ "kind": kind })));
        ImageOutcome::NoImage
    }

    fn dispatch_failed(&self, kind: &str, err: &anyhow::Error) -> ImageOutcome {
        let error = format!("{err:#}");
        tracing::error!(backend = self.backend.name(), kind, %error, "image dispatch failed");
        self.record(
            "dispatch_failed",
            event(json!({ "kind": kind, "error": error })),
        );
        ImageOutcome::Failed { error }
    }

    fn require_credential(&self) -> Result<Credential, SessionError> {
        self.lock_credential()
            .get()
            .cloned()
            .ok_or(SessionError::MissingCredential)
    }

    /// Applies `update` and raises `busy` in the same replacement.
    fn begin_call(
        &self,
        update: impl FnOnce(ConversationState) -> ConversationState,
    ) -> BusyGuard<'_> {
        let mut shared = self.lock_shared();
        shared.in_flight += 1;
        let current = std::mem::replace(&mut shared.state, ConversationState::empty());
        shared.state = update(current).with_busy(true);
        BusyGuard { session: self }
    }

    fn apply(
        &self,
        update: impl FnOnce(ConversationState) -> ConversationState,
    ) -> ConversationState {
        let mut shared = self.lock_shared();
        let current = std::mem::replace(&mut shared.state, ConversationState::empty());
        shared.state = update(current);
        shared.state.clone()
    }

    // Replacements are whole values, so a poisoned lock still holds a
    // complete state.
    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_credential(&self) -> MutexGuard<'_, CredentialState> {
        self.credential
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.log.emit(event_type, payload) {
            tracing::warn!(event_type, error = %err, "session log write failed");
        }
    }
}

fn event(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use anyhow::{bail, Result};
    use ethereal_contracts::chat::{EditIntentClassifier, EditPreset};
    use ethereal_contracts::events::SessionLog;
    use ethereal_contracts::session::{ImageHandle, Message, Phase, Role};
    use serde_json::Value;

    use super::{ConsultantSession, ImageOutcome, SessionError, TurnOutcome};
    use crate::credential::Credential;
    use crate::StudioBackend;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Chat { history_len: usize, images: usize },
        Generate { prompt: String, references: usize },
        Edit { base: ImageHandle, instruction: String },
    }

    /// Replies and image results are queued up front; every call is recorded
    /// along with the busy flag observed while it ran.
    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<Vec<Result<String, String>>>,
        images: Mutex<Vec<Result<Option<ImageHandle>, String>>>,
        calls: Mutex<Vec<Call>>,
        busy_during_call: Mutex<Vec<bool>>,
        observer: Mutex<Option<Arc<ConsultantSession>>>,
    }

    impl ScriptedBackend {
        fn reply(self, text: &str) -> Self {
            self.replies.lock().unwrap().push(Ok(text.to_string()));
            self
        }

        fn reply_err(self, error: &str) -> Self {
            self.replies.lock().unwrap().push(Err(error.to_string()));
            self
        }

        fn image(self, result: Result<Option<ImageHandle>, String>) -> Self {
            self.images.lock().unwrap().push(result);
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn observe_busy(&self) {
            if let Some(session) = self.observer.lock().unwrap().as_ref() {
                self.busy_during_call
                    .lock()
                    .unwrap()
                    .push(session.is_busy());
            }
        }

        fn next_image(&self) -> Result<Option<ImageHandle>> {
            let mut queue = self.images.lock().unwrap();
            if queue.is_empty() {
                bail!("no scripted image");
            }
            match queue.remove(0) {
                Ok(image) => Ok(image),
                Err(error) => bail!(error),
            }
        }
    }

    impl StudioBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn chat(
            &self,
            _credential: &Credential,
            history: &[Message],
            new_images: &[ImageHandle],
        ) -> Result<String> {
            self.observe_busy();
            self.calls.lock().unwrap().push(Call::Chat {
                history_len: history.len(),
                images: new_images.len(),
            });
            let mut queue = self.replies.lock().unwrap();
            if queue.is_empty() {
                bail!("no scripted reply");
            }
            match queue.remove(0) {
                Ok(reply) => Ok(reply),
                Err(error) => bail!(error),
            }
        }

        fn generate_image(
            &self,
            _credential: &Credential,
            prompt: &str,
            references: &[ImageHandle],
        ) -> Result<Option<ImageHandle>> {
            self.observe_busy();
            self.calls.lock().unwrap().push(Call::Generate {
                prompt: prompt.to_string(),
                references: references.len(),
            });
            self.next_image()
        }

        fn edit_image(
            &self,
            _credential: &Credential,
            base: &ImageHandle,
            instruction: &str,
        ) -> Result<Option<ImageHandle>> {
            self.observe_busy();
            self.calls.lock().unwrap().push(Call::Edit {
                base: base.clone(),
                instruction: instruction.to_string(),
            });
            self.next_image()
        }
    }

    fn image(tag: &str) -> ImageHandle {
        ImageHandle::from_base64("image/png", tag)
    }

    fn session_with(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, Arc<ConsultantSession>) {
        let backend = Arc::new(backend);
        let session = Arc::new(ConsultantSession::new(
            backend.clone(),
            SessionLog::disabled(),
        ));
        session.set_credential(Credential::new("test-key").unwrap());
        *backend.observer.lock().unwrap() = Some(session.clone());
        (backend, session)
    }

    fn release_observer(backend: &ScriptedBackend) {
        backend.observer.lock().unwrap().take();
    }

    #[test]
    fn missing_credential_blocks_every_operation_before_state_changes() {
        let backend = Arc::new(ScriptedBackend::default().reply("hi"));
        let session = ConsultantSession::new(backend.clone(), SessionLog::disabled());

        assert_eq!(
            session.send_message("hello"),
            Err(SessionError::MissingCredential)
        );
        assert_eq!(
            session.upload_photos(vec![image("p")]),
            Err(SessionError::MissingCredential)
        );
        assert_eq!(
            session.edit_latest("remove the hat"),
            Err(SessionError::MissingCredential)
        );
        assert!(backend.calls().is_empty());
        assert_eq!(session.snapshot().messages().len(), 1);
        assert!(session.snapshot().reference_photos().is_empty());
    }

    #[test]
    fn credential_lifecycle_is_explicit() {
        let session = ConsultantSession::new(
            Arc::new(ScriptedBackend::default()),
            SessionLog::disabled(),
        );
        assert!(!session.has_credential());
        session.set_credential(Credential::new("k").unwrap());
        assert!(session.has_credential());
        session.clear_credential();
        assert!(!session.has_credential());
    }

    #[test]
    fn blank_input_is_ignored() {
        let (backend, session) = session_with(ScriptedBackend::default());
        assert_eq!(session.send_message("   "), Ok(TurnOutcome::Ignored));
        assert_eq!(session.upload_photos(Vec::new()), Ok(TurnOutcome::Ignored));
        assert!(backend.calls().is_empty());
        release_observer(&backend);
    }

    #[test]
    fn directive_reply_generates_and_enters_preview() {
        let (backend, session) = session_with(
            ScriptedBackend::default()
                .reply("Here it is!\n[SCENE_SUMMARY]: A garden. [VISUAL_PROMPT]: golden hour, 85mm")
                .image(Ok(Some(image("g1")))),
        );

        let outcome = session.send_message("lace dress, garden").unwrap();
        match outcome {
            TurnOutcome::Replied {
                image: ImageOutcome::Generated { directive },
                ..
            } => assert_eq!(directive.scene_summary, "A garden."),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let state = session.snapshot();
        assert_eq!(state.phase(), Phase::Preview);
        assert_eq!(state.assets().latest(), Some(&image("g1")));
        assert!(!state.is_busy());
        let roles: Vec<Role> = state.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(
            backend.calls()[1],
            Call::Generate {
                prompt: "golden hour, 85mm".to_string(),
                references: 0
            }
        );
        assert_eq!(*backend.busy_during_call.lock().unwrap(), vec![true, true]);
        release_observer(&backend);
    }

    #[test]
    fn upload_records_photos_and_dispatches_immediately() {
        let (backend, session) = session_with(
            ScriptedBackend::default().reply("Thank you! Tell me about the attire."),
        );
        let outcome = session
            .upload_photos(vec![image("bride"), image("groom")])
            .unwrap();
        assert!(matches!(
            outcome,
            TurnOutcome::Replied {
                image: ImageOutcome::NotRequested,
                ..
            }
        ));

        let state = session.snapshot();
        assert_eq!(state.reference_photos(), &[image("bride"), image("groom")]);
        let upload = &state.messages()[1];
        assert_eq!(upload.content, "I've uploaded 2 photos.");
        assert_eq!(upload.images.len(), 2);
        assert_eq!(
            backend.calls(),
            vec![Call::Chat {
                history_len: 2,
                images: 2
            }]
        );
        release_observer(&backend);
    }

    #[test]
    fn generation_uses_uploaded_references() {
        let (backend, session) = session_with(
            ScriptedBackend::default()
                .reply("Lovely photos. What attire?")
                .reply("[VISUAL_PROMPT]: couple in a vineyard")
                .image(Ok(Some(image("g1")))),
        );
        session.upload_photos(vec![image("a"), image("b")]).unwrap();
        session.send_message("vineyard, lace gown").unwrap();
        assert_eq!(
            backend.calls()[2],
            Call::Generate {
                prompt: "couple in a vineyard".to_string(),
                references: 2
            }
        );
        release_observer(&backend);
    }

    #[test]
    fn no_edit_without_existing_image() {
        let (backend, session) =
            session_with(ScriptedBackend::default().reply("Happy to adjust later."));
        let outcome = session.send_message("change the filter").unwrap();
        assert!(matches!(
            outcome,
            TurnOutcome::Replied {
                image: ImageOutcome::NotRequested,
                ..
            }
        ));
        assert_eq!(backend.calls().len(), 1);
        release_observer(&backend);
    }

    #[test]
    fn edit_request_targets_latest_image_with_exact_text() {
        let (backend, session) = session_with(
            ScriptedBackend::default()
                .reply("[VISUAL_PROMPT]: first")
                .image(Ok(Some(image("g1"))))
                .reply("Of course, removing it now.")
                .image(Ok(Some(image("e1")))),
        );
        session.send_message("let's see it").unwrap();
        let outcome = session.send_message("please remove the hat").unwrap();
        assert!(matches!(
            outcome,
            TurnOutcome::Replied {
                image: ImageOutcome::Edited { .. },
                ..
            }
        ));
        assert_eq!(
            backend.calls()[3],
            Call::Edit {
                base: image("g1"),
                instruction: "please remove the hat".to_string()
            }
        );

        let state = session.snapshot();
        assert_eq!(state.assets().len(), 2);
        assert_eq!(state.assets().latest(), Some(&image("e1")));
        // Edit results never become assistant text.
        assert_eq!(
            state.last_message().map(|m| m.content.as_str()),
            Some("Of course, removing it now.")
        );
        release_observer(&backend);
    }

    #[test]
    fn chat_failure_releases_busy_and_appends_nothing_else() {
        let (backend, session) =
            session_with(ScriptedBackend::default().reply_err("backend unreachable"));
        let outcome = session.send_message("hello").unwrap();
        match outcome {
            TurnOutcome::ChatFailed { error } => assert!(error.contains("unreachable")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let state = session.snapshot();
        assert!(!state.is_busy());
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.last_message().map(|m| m.role), Some(Role::User));
        release_observer(&backend);
    }

    #[test]
    fn failed_or_empty_generation_leaves_state_except_busy() {
        let (backend, session) = session_with(
            ScriptedBackend::default()
                .reply("[VISUAL_PROMPT]: one")
                .image(Err("quota exceeded".to_string()))
                .reply("[VISUAL_PROMPT]: two")
                .image(Ok(None)),
        );
        let first = session.send_message("go").unwrap();
        assert!(matches!(
            first,
            TurnOutcome::Replied {
                image: ImageOutcome::Failed { .. },
                ..
            }
        ));
        let second = session.send_message("again").unwrap();
        assert!(matches!(
            second,
            TurnOutcome::Replied {
                image: ImageOutcome::NoImage,
                ..
            }
        ));

        let state = session.snapshot();
        assert!(state.assets().is_empty());
        assert_eq!(state.phase(), Phase::Identity);
        assert!(!state.is_busy());
        release_observer(&backend);
    }

    #[test]
    fn preview_survives_later_failures() {
        let (backend, session) = session_with(
            ScriptedBackend::default()
                .reply("[VISUAL_PROMPT]: one")
                .image(Ok(Some(image("g1"))))
                .reply("[VISUAL_PROMPT]: two")
                .image(Err("boom".to_string())),
        );
        session.send_message("go").unwrap();
        assert_eq!(session.snapshot().phase(), Phase::Preview);
        session.send_message("again").unwrap();
        assert_eq!(session.snapshot().phase(), Phase::Preview);
        assert_eq!(session.set_phase(Phase::Gathering), Phase::Preview);
        release_observer(&backend);
    }

    /// Treats only messages naming a colour grade as edits.
    struct ColourGradeClassifier;

    impl EditIntentClassifier for ColourGradeClassifier {
        fn is_edit_request(&self, text: &str) -> bool {
            text.to_lowercase().contains("sepia")
        }
    }

    #[test]
    fn installed_classifier_replaces_keyword_heuristic() {
        let backend = Arc::new(
            ScriptedBackend::default()
                .reply("[VISUAL_PROMPT]: first")
                .image(Ok(Some(image("g1"))))
                .reply("Noted, we can revisit the hat.")
                .reply("Warming it up now.")
                .image(Ok(Some(image("sepia")))),
        );
        let session = ConsultantSession::new(backend.clone(), SessionLog::disabled())
            .with_classifier(Box::new(ColourGradeClassifier));
        session.set_credential(Credential::new("test-key").unwrap());

        session.send_message("show us").unwrap();
        let keyword_only = session.send_message("please remove the hat").unwrap();
        assert!(matches!(
            keyword_only,
            TurnOutcome::Replied {
                image: ImageOutcome::NotRequested,
                ..
            }
        ));
        assert!(!backend
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Edit { .. })));

        let graded = session.send_message("give it a sepia look").unwrap();
        assert_eq!(
            graded,
            TurnOutcome::Replied {
                reply: "Warming it up now.".to_string(),
                image: ImageOutcome::Edited {
                    instruction: "give it a sepia look".to_string()
                },
            }
        );
        assert_eq!(
            backend.calls().last(),
            Some(&Call::Edit {
                base: image("g1"),
                instruction: "give it a sepia look".to_string()
            })
        );
        assert_eq!(session.snapshot().assets().latest(), Some(&image("sepia")));
    }

    #[test]
    fn presets_edit_latest_concept() {
        let (backend, session) = session_with(
            ScriptedBackend::default()
                .reply("[VISUAL_PROMPT]: one")
                .image(Ok(Some(image("g1"))))
                .image(Ok(Some(image("bw")))),
        );
        assert_eq!(
            session.apply_preset(EditPreset::BlackAndWhite),
            Ok(ImageOutcome::NotRequested)
        );
        session.send_message("go").unwrap();
        let outcome = session.apply_preset(EditPreset::BlackAndWhite).unwrap();
        assert_eq!(
            outcome,
            ImageOutcome::Edited {
                instruction: EditPreset::BlackAndWhite.instruction().to_string()
            }
        );
        assert_eq!(session.snapshot().assets().latest(), Some(&image("bw")));
        release_observer(&backend);
    }

    #[test]
    fn session_log_records_failures() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let backend = Arc::new(
            ScriptedBackend::default()
                .reply("[VISUAL_PROMPT]: one")
                .image(Err("quota exceeded".to_string())),
        );
        let session = ConsultantSession::new(backend, SessionLog::new(&path));
        session.set_credential(Credential::new("k").unwrap());
        session.send_message("go").unwrap();

        let raw = std::fs::read_to_string(&path)?;
        let types: Vec<String> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(
            types,
            vec![
                "credential_set",
                "message_sent",
                "reply_received",
                "dispatch_failed"
            ]
        );
        assert!(!raw.contains("\"k\""));
        Ok(())
    }

    /// Edit calls block until the test releases them by instruction.
    struct GatedBackend {
        gates: Mutex<HashMap<String, Receiver<()>>>,
        started: Mutex<Sender<String>>,
    }

    impl StudioBackend for GatedBackend {
        fn name(&self) -> &str {
            "gated"
        }

        fn chat(&self, _: &Credential, _: &[Message], _: &[ImageHandle]) -> Result<String> {
            bail!("unused")
        }

        fn generate_image(
            &self,
            _: &Credential,
            _: &str,
            _: &[ImageHandle],
        ) -> Result<Option<ImageHandle>> {
            bail!("unused")
        }

        fn edit_image(
            &self,
            _: &Credential,
            _: &ImageHandle,
            instruction: &str,
        ) -> Result<Option<ImageHandle>> {
            let gate = self.gates.lock().unwrap().remove(instruction);
            self.started.lock().unwrap().send(instruction.to_string())?;
            if let Some(gate) = gate {
                gate.recv()?;
            }
            Ok(Some(image(instruction)))
        }
    }

    #[test]
    fn overlapping_edits_land_in_completion_order() -> anyhow::Result<()> {
        let (release_first, first_gate) = mpsc::channel();
        let (release_second, second_gate) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::channel();
        let mut gates = HashMap::new();
        gates.insert("first".to_string(), first_gate);
        gates.insert("second".to_string(), second_gate);

        let backend = Arc::new(GatedBackend {
            gates: Mutex::new(gates),
            started: Mutex::new(started_tx),
        });
        let state = ethereal_contracts::session::ConversationState::new()
            .with_generated(image("base"));
        let session = Arc::new(ConsultantSession::with_state(
            backend,
            SessionLog::disabled(),
            state,
        ));
        session.set_credential(Credential::new("k").unwrap());

        let first = {
            let session = session.clone();
            thread::spawn(move || session.edit_latest("first"))
        };
        let second = {
            let session = session.clone();
            thread::spawn(move || session.edit_latest("second"))
        };
        started_rx.recv()?;
        started_rx.recv()?;
        assert!(session.is_busy());

        release_second.send(())?;
        assert!(matches!(
            second.join().unwrap(),
            Ok(ImageOutcome::Edited { .. })
        ));
        assert!(session.is_busy(), "first edit is still outstanding");

        release_first.send(())?;
        assert!(matches!(
            first.join().unwrap(),
            Ok(ImageOutcome::Edited { .. })
        ));

        let state = session.snapshot();
        assert!(!state.is_busy());
        let order: Vec<&ImageHandle> = state.assets().iter().map(|(_, _, img)| img).collect();
        assert_eq!(order, vec![&image("first"), &image("second"), &image("base")]);
        Ok(())
    }
}
