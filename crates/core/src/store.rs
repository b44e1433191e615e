//! Presentation state: slides, per-slide history and whole-deck snapshots.
//!
//! All mutation goes through the command methods on [`PresentationStore`].
//! Collaborator calls never run under the state lock; results are written
//! back into whatever the state is when they arrive, touching only the field
//! they own, so concurrent edits of different slides never overwrite each
//! other.

use crate::config::SlideConfig;
use crate::error::{ExportError, Result};
use crate::generate::{convert_html_to_slides, modify_all_slides_html, modify_slide_html, HtmlGenerator};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex as SyncMutex;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One replaced version of a slide.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub instruction: String,
    /// Slide markup before the change.
    pub html: String,
    pub created_at: SystemTime,
}

/// The whole deck before a bulk change.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub instruction: String,
    pub slides: Vec<String>,
    pub created_at: SystemTime,
}

impl HistoryEntry {
    fn new(instruction: impl Into<String>, html: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            instruction: instruction.into(),
            html,
            created_at: SystemTime::now(),
        }
    }
}

impl Snapshot {
    fn new(instruction: impl Into<String>, slides: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            instruction: instruction.into(),
            slides,
            created_at: SystemTime::now(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    slides: Vec<String>,
    histories: Vec<Vec<HistoryEntry>>,
    snapshots: Vec<Snapshot>,
    current: usize,
}

impl State {
    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.slides.len() {
            Ok(())
        } else {
            Err(ExportError::SlideOutOfRange {
                index,
                len: self.slides.len(),
            })
        }
    }

    /// Replace the deck, keeping one history list per slide.
    fn replace_slides(&mut self, slides: Vec<String>) {
        self.histories.resize_with(slides.len(), Vec::new);
        self.slides = slides;
        if self.current >= self.slides.len() {
            self.current = 0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BusyKey {
    Deck,
    Slide(usize),
}

/// Releases a busy marker when the owning operation ends, however it ends.
struct BusyGuard<'a> {
    busy: &'a SyncMutex<HashSet<BusyKey>>,
    key: BusyKey,
}

impl<'a> BusyGuard<'a> {
    fn acquire(busy: &'a SyncMutex<HashSet<BusyKey>>, key: BusyKey) -> Result<Self> {
        let mut set = busy.lock().unwrap_or_else(|e| e.into_inner());
        let conflict = match key {
            BusyKey::Deck => !set.is_empty(),
            BusyKey::Slide(_) => set.contains(&BusyKey::Deck) || set.contains(&key),
        };
        if conflict {
            return Err(match key {
                BusyKey::Slide(index) if !set.contains(&BusyKey::Deck) => {
                    ExportError::SlideBusy(index)
                }
                _ => ExportError::Busy,
            });
        }
        set.insert(key);
        Ok(Self { busy, key })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}

/// Owned state of one presentation.
#[derive(Debug)]
pub struct PresentationStore {
    state: Mutex<State>,
    busy: SyncMutex<HashSet<BusyKey>>,
    config: SlideConfig,
}

impl PresentationStore {
    pub fn new(config: SlideConfig) -> Self {
        Self::with_slides(Vec::new(), config)
    }

    pub fn with_slides(slides: Vec<String>, config: SlideConfig) -> Self {
        let mut state = State::default();
        state.replace_slides(slides);
        Self {
            state: Mutex::new(state),
            busy: SyncMutex::new(HashSet::new()),
            config,
        }
    }

    pub async fn slides(&self) -> Vec<String> {
        self.state.lock().await.slides.clone()
    }

    pub async fn slide(&self, index: usize) -> Result<String> {
        let state = self.state.lock().await;
        state.check_index(index)?;
        Ok(state.slides[index].clone())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.slides.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn current_index(&self) -> usize {
        self.state.lock().await.current
    }

    pub async fn set_current_index(&self, index: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_index(index)?;
        state.current = index;
        Ok(())
    }

    /// Whether `index` has an edit in flight.
    pub fn is_modifying(&self, index: usize) -> bool {
        let set = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(&BusyKey::Slide(index)) || set.contains(&BusyKey::Deck)
    }

    /// Replace the presentation with a deck generated from `html`.
    pub async fn generate<G: HtmlGenerator>(&self, generator: &G, html: &str) -> Result<usize> {
        let _guard = BusyGuard::acquire(&self.busy, BusyKey::Deck)?;
        let slides = convert_html_to_slides(generator, html, &self.config).await?;
        let count = slides.len();

        let mut state = self.state.lock().await;
        state.histories.clear();
        state.snapshots.clear();
        state.current = 0;
        state.replace_slides(slides);
        Ok(count)
    }

    /// Edit one slide. Only that slide is written, into the latest state.
    pub async fn modify_slide<G: HtmlGenerator>(
        &self,
        generator: &G,
        index: usize,
        instruction: &str,
    ) -> Result<String> {
        if instruction.trim().is_empty() {
            return Err(ExportError::EmptyInstruction);
        }
        let _guard = BusyGuard::acquire(&self.busy, BusyKey::Slide(index))?;
        let original = self.slide(index).await?;
        debug!("Modifying slide {}", index);

        let modified = modify_slide_html(generator, &original, instruction, &self.config).await?;

        let mut state = self.state.lock().await;
        state.check_index(index)?;
        let previous = std::mem::replace(&mut state.slides[index], modified.clone());
        state.histories[index].push(HistoryEntry::new(instruction, previous));
        info!("Slide {} modified", index);
        Ok(modified)
    }

    /// Edit every slide in one request, snapshotting the deck first.
    pub async fn modify_all_slides<G: HtmlGenerator>(
        &self,
        generator: &G,
        instruction: &str,
    ) -> Result<()> {
        if instruction.trim().is_empty() {
            return Err(ExportError::EmptyInstruction);
        }
        let _guard = BusyGuard::acquire(&self.busy, BusyKey::Deck)?;
        let before = self.slides().await;
        let modified = modify_all_slides_html(generator, &before, instruction, &self.config).await?;

        let mut state = self.state.lock().await;
        state.snapshots.push(Snapshot::new(instruction, before));
        state.replace_slides(modified);
        info!("Modified all {} slides", state.slides.len());
        Ok(())
    }

    /// Replace the deck wholesale (e.g. after viewport repair), snapshotting first.
    pub async fn replace_slides(&self, slides: Vec<String>, reason: &str) -> Result<()> {
        let _guard = BusyGuard::acquire(&self.busy, BusyKey::Deck)?;
        let mut state = self.state.lock().await;
        let before = std::mem::take(&mut state.slides);
        state.snapshots.push(Snapshot::new(reason, before));
        state.replace_slides(slides);
        Ok(())
    }

    pub async fn history(&self, index: usize) -> Result<Vec<HistoryEntry>> {
        let state = self.state.lock().await;
        state.check_index(index)?;
        Ok(state.histories[index].clone())
    }

    pub async fn snapshots(&self) -> Vec<Snapshot> {
        self.state.lock().await.snapshots.clone()
    }

    /// Restore a slide to a history entry; the replaced version is recorded too.
    pub async fn revert_slide(&self, index: usize, position: usize) -> Result<()> {
        let _guard = BusyGuard::acquire(&self.busy, BusyKey::Slide(index))?;
        let mut state = self.state.lock().await;
        state.check_index(index)?;
        let restored = state.histories[index]
            .get(position)
            .map(|entry| entry.html.clone())
            .ok_or(ExportError::HistoryOutOfRange {
                kind: "history entry",
                position,
            })?;
        let previous = std::mem::replace(&mut state.slides[index], restored);
        state.histories[index].push(HistoryEntry::new(format!("revert to #{position}"), previous));
        Ok(())
    }

    /// Restore the whole deck to a snapshot; the replaced deck is snapshotted too.
    pub async fn revert_to_snapshot(&self, position: usize) -> Result<()> {
        let _guard = BusyGuard::acquire(&self.busy, BusyKey::Deck)?;
        let mut state = self.state.lock().await;
        let restored = state
            .snapshots
            .get(position)
            .map(|snapshot| snapshot.slides.clone())
            .ok_or(ExportError::HistoryOutOfRange {
                kind: "snapshot",
                position,
            })?;
        if restored.len() != state.slides.len() {
            warn!(
                "Snapshot {} has {} slides, deck has {}",
                position,
                restored.len(),
                state.slides.len()
            );
        }
        let before = std::mem::take(&mut state.slides);
        state
            .snapshots
            .push(Snapshot::new(format!("revert to snapshot #{position}"), before));
        state.replace_slides(restored);
        Ok(())
    }
}
