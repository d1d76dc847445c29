use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use photolab_contracts::errors::{ConfigError, EnhanceError, SessionError};
use photolab_contracts::events::{EventPayload, EventWriter, SessionEvent};
use photolab_contracts::images::{EncodedImage, SharedImage};
use photolab_contracts::modes::{AspectRatio, EnhancementConfig, ModeRegistry};
use photolab_contracts::prompt::build_prompt;
use photolab_contracts::session::{
    ActiveView, BoundingBox, ComparisonSlider, EnhancementResult, SessionHistory,
};
use serde_json::{json, Value};

use crate::composite::write_comparison_png;
use crate::{image_fingerprint, EnhancementGateway};

pub const EXPORT_FILE_NAME: &str = "tisera_final.png";
pub const COMPARISON_FILE_NAME: &str = "tisera_compare.png";

/// Everything needed to run one gateway call away from the session.
///
/// Produced by [`LabSession::begin_enhance`] and handed back to
/// [`LabSession::settle`] with the outcome.
#[derive(Debug, Clone)]
pub struct PendingEnhancement {
    original: SharedImage,
    prompt: String,
    aspect_ratio: AspectRatio,
}

impl PendingEnhancement {
    pub fn original(&self) -> &SharedImage {
        &self.original
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn run(&self, gateway: &dyn EnhancementGateway) -> Result<EncodedImage, EnhanceError> {
        gateway.enhance(&self.original, &self.prompt, self.aspect_ratio)
    }
}

/// The lab's single mutable state: selection, configuration, the on-screen
/// pair, the bounded history and the comparison divider.
///
/// At most one enhancement is in flight; `is_processing` is cleared on every
/// settle, whatever the outcome.
#[derive(Debug)]
pub struct LabSession {
    modes: ModeRegistry,
    config: EnhancementConfig,
    note: String,
    view: ActiveView,
    history: SessionHistory,
    slider: ComparisonSlider,
    is_processing: bool,
    last_error: Option<EnhanceError>,
    events: Option<EventWriter>,
    started_at: DateTime<Utc>,
}

impl LabSession {
    pub fn new(modes: ModeRegistry, history_capacity: usize) -> Self {
        Self {
            modes,
            config: EnhancementConfig::default(),
            note: String::new(),
            view: ActiveView::empty(),
            history: SessionHistory::new(history_capacity),
            slider: ComparisonSlider::new(),
            is_processing: false,
            last_error: None,
            events: None,
            started_at: Utc::now(),
        }
    }

    /// Attaches an event log and records `session_started`.
    pub fn attach_events(&mut self, writer: EventWriter) -> Result<(), SessionError> {
        self.events = Some(writer);
        self.record(
            SessionEvent::SessionStarted,
            json!({
                "modes": self.modes.ids(),
                "mode": self.config.mode,
                "aspect_ratio": self.config.aspect_ratio.as_str(),
                "history_capacity": self.history.capacity(),
            }),
        )
    }

    pub fn modes(&self) -> &ModeRegistry {
        &self.modes
    }

    pub fn config(&self) -> &EnhancementConfig {
        &self.config
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn view(&self) -> &ActiveView {
        &self.view
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn slider(&self) -> &ComparisonSlider {
        &self.slider
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn last_error(&self) -> Option<&EnhanceError> {
        self.last_error.as_ref()
    }

    pub fn events(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Prompt the next submission would send.
    pub fn current_prompt(&self) -> Result<String, ConfigError> {
        build_prompt(&self.modes, &self.config, &self.note)
    }

    /// Makes `image` the original on screen. Any enhanced image and error
    /// shown for the previous selection are dropped; history is kept.
    pub fn select_image(&mut self, image: EncodedImage) -> Result<SharedImage, SessionError> {
        let original = image.into_shared();
        self.view = ActiveView::with_original(original.clone());
        self.slider.unbind();
        self.last_error = None;
        self.record(
            SessionEvent::ImageSelected,
            json!({
                "mime_type": original.mime_type(),
                "bytes": original.byte_len(),
                "image": image_fingerprint(&original),
            }),
        )?;
        Ok(original)
    }

    pub fn set_mode(&mut self, mode: &str) -> Result<(), SessionError> {
        let id = self.modes.ensure(mode)?.id.clone();
        self.config.mode = id;
        self.record_config()
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: AspectRatio) -> Result<(), SessionError> {
        self.config.aspect_ratio = aspect_ratio;
        self.record_config()
    }

    pub fn set_note(&mut self, note: &str) -> Result<(), SessionError> {
        self.note = note.trim().to_string();
        self.record_config()
    }

    /// Validates the session and marks it busy. The returned request is run
    /// outside the session and its outcome passed to [`Self::settle`].
    pub fn begin_enhance(&mut self) -> Result<PendingEnhancement, SessionError> {
        if self.is_processing {
            return Err(SessionError::Busy);
        }
        let original = self.view.original().cloned().ok_or(SessionError::NoImage)?;
        let prompt = self.current_prompt()?;
        let pending = PendingEnhancement {
            original,
            prompt,
            aspect_ratio: self.config.aspect_ratio,
        };

        self.is_processing = true;
        self.last_error = None;
        let logged = self.record(
            SessionEvent::EnhanceStarted,
            json!({
                "mode": self.config.mode,
                "aspect_ratio": pending.aspect_ratio.as_str(),
                "prompt": pending.prompt,
                "image": image_fingerprint(&pending.original),
            }),
        );
        if let Err(err) = logged {
            self.is_processing = false;
            return Err(err);
        }
        Ok(pending)
    }

    /// Applies a gateway outcome.
    ///
    /// A success is always added to history, but only shown when the
    /// original it was made from is still the one on screen.
    pub fn settle(
        &mut self,
        pending: PendingEnhancement,
        outcome: Result<EncodedImage, EnhanceError>,
    ) -> Result<SharedImage, SessionError> {
        self.is_processing = false;
        match outcome {
            Ok(image) => {
                let enhanced = image.into_shared();
                self.history.push(EnhancementResult::new(
                    pending.original.clone(),
                    enhanced.clone(),
                    pending.prompt.as_str(),
                ));
                let displayed = self
                    .view
                    .original()
                    .map(|current| Arc::ptr_eq(current, &pending.original))
                    .unwrap_or(false);
                if displayed {
                    self.view.set_enhanced(enhanced.clone())?;
                    self.slider.bind(&pending.original, &enhanced);
                    self.last_error = None;
                }
                self.record(
                    SessionEvent::EnhanceSucceeded,
                    json!({
                        "image": image_fingerprint(&enhanced),
                        "prompt": pending.prompt,
                        "displayed": displayed,
                        "history_len": self.history.len(),
                    }),
                )?;
                Ok(enhanced)
            }
            Err(err) => {
                self.last_error = Some(err.clone());
                self.record(
                    SessionEvent::EnhanceFailed,
                    json!({
                        "kind": err.kind(),
                        "error": err.to_string(),
                        "credential_reselect": err.offers_credential_reselect(),
                    }),
                )?;
                Err(SessionError::Enhance(err))
            }
        }
    }

    /// Runs one enhancement synchronously against `gateway`.
    pub fn submit(
        &mut self,
        gateway: &dyn EnhancementGateway,
    ) -> Result<SharedImage, SessionError> {
        let pending = self.begin_enhance()?;
        let outcome = pending.run(gateway);
        self.settle(pending, outcome)
    }

    /// Drops the enhanced image so the original can be reconfigured and
    /// submitted again.
    pub fn readjust(&mut self) -> Result<(), SessionError> {
        if self.view.original().is_none() {
            return Err(SessionError::NoImage);
        }
        if self.view.enhanced().is_none() {
            return Err(SessionError::NothingEnhanced);
        }
        self.view.clear_enhanced();
        self.slider.unbind();
        self.record(SessionEvent::ViewReadjusted, json!({}))
    }

    /// Closes the current photo. History survives.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.view.clear();
        self.slider.unbind();
        self.last_error = None;
        self.record(
            SessionEvent::SessionReset,
            json!({ "history_cleared": false, "history_len": self.history.len() }),
        )
    }

    /// Closes the current photo and forgets every stored result.
    pub fn clear_session(&mut self) -> Result<(), SessionError> {
        self.view.clear();
        self.slider.unbind();
        self.history.clear();
        self.note.clear();
        self.last_error = None;
        self.record(
            SessionEvent::SessionReset,
            json!({ "history_cleared": true, "history_len": 0 }),
        )
    }

    /// Shows the history entry at `index` (0 is the newest).
    pub fn select_history(&mut self, index: usize) -> Result<&EnhancementResult, SessionError> {
        let entry = self
            .history
            .get(index)
            .ok_or(SessionError::UnknownHistoryEntry(index))?;
        let view = SessionHistory::select_for_viewing(entry);
        let id = entry.id().to_string();
        if let (Some(original), Some(enhanced)) = (view.original(), view.enhanced()) {
            self.slider.bind(original, enhanced);
        }
        self.view = view;
        self.last_error = None;
        self.record(
            SessionEvent::HistorySelected,
            json!({ "index": index, "id": id }),
        )?;
        self.history
            .get(index)
            .ok_or(SessionError::UnknownHistoryEntry(index))
    }

    /// Moves the divider from a pointer event. Ignored when nothing is being
    /// compared or the bounds are degenerate.
    pub fn pointer_move(&mut self, pointer_x: f64, bounds: BoundingBox) -> Option<f64> {
        self.slider.pair()?;
        self.slider.pointer_move(pointer_x, bounds)
    }

    pub fn set_slider(&mut self, percent: f64) -> Result<f64, SessionError> {
        if self.slider.pair().is_none() {
            return Err(SessionError::NothingEnhanced);
        }
        Ok(self.slider.set_position(percent))
    }

    /// Writes the enhanced image on screen to `dir`.
    pub fn export_enhanced(&self, dir: &Path) -> Result<PathBuf> {
        let enhanced = self.view.enhanced().ok_or(SessionError::NothingEnhanced)?;
        fs::create_dir_all(dir).with_context(|| format!("failed creating {}", dir.display()))?;
        let path = dir.join(EXPORT_FILE_NAME);
        fs::write(&path, enhanced.bytes()?)
            .with_context(|| format!("failed writing {}", path.display()))?;
        self.record(
            SessionEvent::Exported,
            json!({ "kind": "enhanced", "path": path.to_string_lossy() }),
        )?;
        Ok(path)
    }

    /// Renders the before/after frame at the current divider and writes it
    /// to `dir`.
    pub fn export_comparison(&self, dir: &Path) -> Result<PathBuf> {
        let (before, after) = self.slider.pair().ok_or(SessionError::NothingEnhanced)?;
        let path = dir.join(COMPARISON_FILE_NAME);
        write_comparison_png(&path, before, after, &self.slider)?;
        self.record(
            SessionEvent::Exported,
            json!({
                "kind": "comparison",
                "path": path.to_string_lossy(),
                "position": self.slider.position(),
            }),
        )?;
        Ok(path)
    }

    fn record_config(&self) -> Result<(), SessionError> {
        self.record(
            SessionEvent::ConfigChanged,
            json!({
                "mode": self.config.mode,
                "aspect_ratio": self.config.aspect_ratio.as_str(),
                "note": self.note,
            }),
        )
    }

    fn record(&self, event: SessionEvent, payload: Value) -> Result<(), SessionError> {
        let Some(events) = self.events.as_ref() else {
            return Ok(());
        };
        let payload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        events
            .record(event, payload)
            .map(|_| ())
            .map_err(|err| SessionError::EventLog(format!("{err:#}")))
    }
}

#[cfg(test)]
mod tests {
    use photolab_contracts::events::read_events;

    use super::*;
    use crate::test_support::{png_image, ScriptedGateway};

    fn session() -> LabSession {
        LabSession::new(ModeRegistry::default(), 8)
    }

    fn select(session: &mut LabSession, color: [u8; 3]) -> SharedImage {
        session
            .select_image(png_image(color))
            .unwrap_or_else(|err| panic!("select failed: {err}"))
    }

    #[test]
    fn restore_four_by_three_without_note_sends_base_prompt() -> anyhow::Result<()> {
        let mut session = session();
        let original = select(&mut session, [10, 10, 10]);
        session.set_mode("restore")?;
        session.set_aspect_ratio(AspectRatio::Landscape)?;
        let gateway = ScriptedGateway::new(vec![Ok(png_image([200, 200, 200]))]);

        let enhanced = session.submit(&gateway)?;

        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].prompt,
            "RESTAURACIÓN TÉCNICA: Borrado de rayones y recuperación de contraste."
        );
        assert_eq!(calls[0].aspect_ratio, AspectRatio::Landscape);
        assert!(!session.is_processing());
        assert_eq!(session.history().len(), 1);
        assert!(session
            .view()
            .original()
            .map(|shown| Arc::ptr_eq(shown, &original))
            .unwrap_or(false));
        assert!(session
            .view()
            .enhanced()
            .map(|shown| Arc::ptr_eq(shown, &enhanced))
            .unwrap_or(false));
        let newest = session.history().get(0);
        assert_eq!(
            newest.map(|entry| entry.prompt_used()),
            Some("RESTAURACIÓN TÉCNICA: Borrado de rayones y recuperación de contraste.")
        );
        assert!(Arc::ptr_eq(session.history().entries()[0].enhanced(), &enhanced));
        assert_eq!(session.slider().position(), 50.0);
        Ok(())
    }

    #[test]
    fn note_is_appended_and_resize_interpolates_ratio() -> anyhow::Result<()> {
        let mut session = session();
        select(&mut session, [1, 1, 1]);
        session.set_mode("resize")?;
        session.set_aspect_ratio(AspectRatio::Wide)?;
        session.set_note("  extender el cielo ")?;
        assert_eq!(
            session.current_prompt()?,
            "RE-ESCALADO HD: Ajuste a 16:9 con regeneración de bordes. Nota extra: extender el cielo"
        );
        Ok(())
    }

    #[test]
    fn two_submissions_share_original_and_keep_newest_first() -> anyhow::Result<()> {
        let mut session = session();
        let original = select(&mut session, [5, 5, 5]);
        let gateway = ScriptedGateway::new(vec![
            Ok(png_image([100, 0, 0])),
            Ok(png_image([0, 100, 0])),
        ]);

        let first = session.submit(&gateway)?;
        session.readjust()?;
        session.set_mode("artistic")?;
        let second = session.submit(&gateway)?;

        let entries = session.history().entries();
        assert_eq!(entries.len(), 2);
        assert!(Arc::ptr_eq(entries[0].enhanced(), &second));
        assert!(Arc::ptr_eq(entries[1].enhanced(), &first));
        assert!(Arc::ptr_eq(entries[0].original(), &original));
        assert!(Arc::ptr_eq(entries[1].original(), &original));
        assert_ne!(entries[0].id(), entries[1].id());
        Ok(())
    }

    #[test]
    fn failure_records_error_without_history() -> anyhow::Result<()> {
        let mut session = session();
        select(&mut session, [5, 5, 5]);
        let gateway = ScriptedGateway::new(vec![Err(EnhanceError::QuotaExceeded(
            "429".to_string(),
        ))]);

        let result = session.submit(&gateway);
        assert!(matches!(
            result,
            Err(SessionError::Enhance(EnhanceError::QuotaExceeded(_)))
        ));
        assert!(!session.is_processing());
        assert!(session.history().is_empty());
        assert!(session.view().enhanced().is_none());
        assert_eq!(session.last_error().map(EnhanceError::kind), Some("quota_exceeded"));
        Ok(())
    }

    #[test]
    fn submit_requires_image_and_rejects_overlap() -> anyhow::Result<()> {
        let mut session = session();
        assert!(matches!(session.begin_enhance(), Err(SessionError::NoImage)));

        select(&mut session, [5, 5, 5]);
        let pending = session.begin_enhance()?;
        assert!(session.is_processing());
        assert!(matches!(session.begin_enhance(), Err(SessionError::Busy)));

        session.settle(pending, Ok(png_image([9, 9, 9])))?;
        assert!(!session.is_processing());
        assert!(session.begin_enhance().is_ok());
        Ok(())
    }

    #[test]
    fn unknown_mode_is_rejected_and_config_kept() -> anyhow::Result<()> {
        let mut session = session();
        session.set_mode("restore")?;
        assert!(matches!(
            session.set_mode("vintage"),
            Err(SessionError::Config(ConfigError::UnknownMode(_)))
        ));
        assert_eq!(session.config().mode, "restore");
        Ok(())
    }

    #[test]
    fn stale_result_goes_to_history_but_not_on_screen() -> anyhow::Result<()> {
        let mut session = session();
        select(&mut session, [5, 5, 5]);
        let pending = session.begin_enhance()?;
        let newer = select(&mut session, [6, 6, 6]);

        session.settle(pending, Ok(png_image([7, 7, 7])))?;
        assert_eq!(session.history().len(), 1);
        assert!(session.view().enhanced().is_none());
        assert!(session
            .view()
            .original()
            .map(|shown| Arc::ptr_eq(shown, &newer))
            .unwrap_or(false));
        Ok(())
    }

    #[test]
    fn readjust_and_reset_keep_history() -> anyhow::Result<()> {
        let mut session = session();
        let original = select(&mut session, [5, 5, 5]);
        assert!(matches!(session.readjust(), Err(SessionError::NothingEnhanced)));
        let gateway = ScriptedGateway::new(vec![Ok(png_image([8, 8, 8]))]);
        session.submit(&gateway)?;

        session.readjust()?;
        assert!(session.view().enhanced().is_none());
        assert!(session
            .view()
            .original()
            .map(|shown| Arc::ptr_eq(shown, &original))
            .unwrap_or(false));
        assert!(session.slider().pair().is_none());

        session.reset()?;
        assert!(session.view().is_empty());
        assert_eq!(session.history().len(), 1);

        session.clear_session()?;
        assert!(session.history().is_empty());
        Ok(())
    }

    #[test]
    fn history_selection_restores_pair_and_slider() -> anyhow::Result<()> {
        let mut session = session();
        let gateway = ScriptedGateway::new(vec![
            Ok(png_image([100, 0, 0])),
            Ok(png_image([0, 100, 0])),
        ]);
        let first_original = select(&mut session, [1, 1, 1]);
        let first = session.submit(&gateway)?;
        select(&mut session, [2, 2, 2]);
        session.submit(&gateway)?;
        session.set_slider(80.0)?;

        let entry_id = session.select_history(1)?.id().to_string();
        assert_eq!(entry_id, session.history().entries()[1].id());
        assert!(session
            .view()
            .original()
            .map(|shown| Arc::ptr_eq(shown, &first_original))
            .unwrap_or(false));
        assert!(SessionHistory::is_displayed(&session.history().entries()[1], session.view()));
        assert!(session
            .view()
            .enhanced()
            .map(|shown| Arc::ptr_eq(shown, &first))
            .unwrap_or(false));
        assert_eq!(session.slider().position(), 50.0);
        assert!(matches!(
            session.select_history(5),
            Err(SessionError::UnknownHistoryEntry(5))
        ));
        Ok(())
    }

    #[test]
    fn slider_needs_a_pair() -> anyhow::Result<()> {
        let mut session = session();
        select(&mut session, [1, 1, 1]);
        assert!(session.set_slider(10.0).is_err());
        assert_eq!(session.pointer_move(10.0, BoundingBox::new(0.0, 100.0)), None);

        let gateway = ScriptedGateway::new(vec![Ok(png_image([2, 2, 2]))]);
        session.submit(&gateway)?;
        assert_eq!(session.pointer_move(-40.0, BoundingBox::new(0.0, 200.0)), Some(0.0));
        assert_eq!(session.pointer_move(150.0, BoundingBox::new(100.0, 200.0)), Some(25.0));
        assert_eq!(session.pointer_move(10.0, BoundingBox::new(0.0, 0.0)), None);
        assert_eq!(session.set_slider(140.0)?, 100.0);
        Ok(())
    }

    #[test]
    fn exports_write_expected_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = session();
        select(&mut session, [1, 1, 1]);
        assert!(session.export_enhanced(temp.path()).is_err());

        let enhanced = png_image([2, 2, 2]);
        let expected = enhanced.bytes()?;
        let gateway = ScriptedGateway::new(vec![Ok(enhanced)]);
        session.submit(&gateway)?;

        let final_path = session.export_enhanced(&temp.path().join("out"))?;
        assert!(final_path.ends_with(EXPORT_FILE_NAME));
        assert_eq!(fs::read(&final_path)?, expected);

        let compare_path = session.export_comparison(&temp.path().join("out"))?;
        assert!(compare_path.ends_with(COMPARISON_FILE_NAME));
        assert!(image::open(&compare_path).is_ok());
        Ok(())
    }

    #[test]
    fn events_follow_the_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = temp.path().join("events.jsonl");
        let mut session = session();
        session.attach_events(EventWriter::new(&log, "lab-test"))?;
        select(&mut session, [1, 1, 1]);
        session.set_mode("standard")?;
        let gateway = ScriptedGateway::new(vec![
            Ok(png_image([2, 2, 2])),
            Err(EnhanceError::Authentication("401".to_string())),
        ]);
        session.submit(&gateway)?;
        session.readjust()?;
        let _ = session.submit(&gateway);
        session.reset()?;

        let types: Vec<String> = read_events(&log)?
            .iter()
            .filter_map(|event| event.get("type").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert_eq!(
            types,
            vec![
                "session_started",
                "image_selected",
                "config_changed",
                "enhance_started",
                "enhance_succeeded",
                "view_readjusted",
                "enhance_started",
                "enhance_failed",
                "session_reset",
            ]
        );
        let failed = read_events(&log)?
            .into_iter()
            .find(|event| event["type"] == json!("enhance_failed"))
            .unwrap_or_default();
        assert_eq!(failed["kind"], json!("authentication"));
        assert_eq!(failed["credential_reselect"], json!(true));
        assert_eq!(failed["session_id"], json!("lab-test"));
        Ok(())
    }
}
