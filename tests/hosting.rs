mod common;

use std::path::Path;
use std::sync::Arc;

use common::{effect, instrument, stereo, EditorKind, Harness, ManualDispatcher, MockPlugin};
use vst3_loader::browser::PluginBrowser;
use vst3_loader::editor::{EditorModel, StatusTone, NO_PLUGIN_TEXT};
use vst3_loader::host::dispatch::CurrentThread;
use vst3_loader::host::midi::MidiBuffer;
use vst3_loader::host::state::HostedState;
use vst3_loader::host::{
    FormatManager, HostProcessor, ParentHandle, PlaybackConfig, ProcessorEvent,
};

const CHORUS: &str = "/plugins/Chorus.vst3";
const DELAY: &str = "/plugins/Delay.vst3";

fn chorus(path: &Path) -> MockPlugin {
    stereo(effect(path, "Acme", "Chorus"))
}

#[test]
fn successful_load_hosts_the_first_effect() {
    let harness = Harness::new();
    let path = Path::new(CHORUS);
    harness.format.add(
        path,
        vec![
            MockPlugin {
                latency: 32,
                ..stereo(instrument(path, "Synth"))
            },
            MockPlugin {
                latency: 64,
                ..chorus(path)
            },
        ],
    );
    let events = harness.processor.subscribe();

    harness.processor.load_plugin(CHORUS);
    assert!(harness.processor.is_currently_loading());
    assert!(!harness.processor.is_hosted_plugin_loaded());

    harness.message_thread.run_all();
    assert!(!harness.processor.is_currently_loading());
    assert!(harness.processor.is_hosted_plugin_loaded());
    assert_eq!(harness.processor.hosted_plugin_name(), "Acme - Chorus");
    assert_eq!(harness.processor.hosted_plugin_path(), CHORUS);
    assert_eq!(harness.processor.hosted_plugin_loading_error(), "");
    assert_eq!(harness.processor.latency_samples(), 64);
    assert_eq!(harness.probe().prepared, vec![(48_000.0, 64)]);
    assert_eq!(events.try_recv(), Ok(ProcessorEvent::LoadFinished));
    assert!(events.try_recv().is_err());
}

#[test]
fn second_load_while_pending_is_ignored() {
    let harness = Harness::with_plugin(CHORUS, chorus);
    harness
        .format
        .add(Path::new(DELAY), vec![stereo(effect(Path::new(DELAY), "Acme", "Delay"))]);

    harness.processor.load_plugin(CHORUS);
    harness.processor.load_plugin(DELAY);
    assert_eq!(harness.message_thread.pending(), 1);
    assert_eq!(harness.processor.hosted_plugin_loading_error(), "");

    harness.message_thread.run_all();
    assert_eq!(harness.format.creates(), 1);
    assert_eq!(harness.processor.hosted_plugin_path(), CHORUS);
}

#[test]
fn instrument_only_bundle_is_rejected_without_instantiating() {
    let harness = Harness::with_plugin("/plugins/Synth.vst3", |p| stereo(instrument(p, "Synth")));
    let events = harness.processor.subscribe();

    harness.load("/plugins/Synth.vst3");
    assert_eq!(
        harness.processor.hosted_plugin_loading_error(),
        "Selected VST3 is not an Audio Effect"
    );
    assert_eq!(harness.format.creates(), 0);
    assert!(!harness.processor.is_hosted_plugin_loaded());
    assert!(!harness.processor.is_currently_loading());
    assert_eq!(events.try_recv(), Ok(ProcessorEvent::LoadFinished));
}

#[test]
fn unknown_bundle_reports_no_candidates() {
    let harness = Harness::new();
    harness.load("/plugins/Nothing.vst3");
    assert_eq!(
        harness.processor.hosted_plugin_loading_error(),
        "No valid VST3 found"
    );
}

#[test]
fn missing_format_is_reported() {
    let message_thread = Arc::new(ManualDispatcher::default());
    let processor = HostProcessor::new(
        FormatManager::new(message_thread.clone()),
        PlaybackConfig {
            sample_rate: 44_100.0,
            block_size: 512,
        },
    );
    processor.load_plugin(CHORUS);
    message_thread.run_all();
    assert_eq!(processor.hosted_plugin_loading_error(), "VST3 format not found");
}

#[test]
fn instantiation_failures_carry_the_format_message() {
    let harness = Harness::with_plugin(CHORUS, chorus);

    harness.format.fail_instantiation(Some("Bundle is damaged"));
    harness.load(CHORUS);
    assert_eq!(
        harness.processor.hosted_plugin_loading_error(),
        "Bundle is damaged"
    );

    harness.format.fail_instantiation(Some(""));
    harness.load(CHORUS);
    assert_eq!(
        harness.processor.hosted_plugin_loading_error(),
        "Unexpected error occurred"
    );

    harness.format.fail_instantiation(None);
    harness.load(CHORUS);
    assert_eq!(harness.processor.hosted_plugin_loading_error(), "");
    assert!(harness.processor.is_hosted_plugin_loaded());
}

#[test]
fn unconfigurable_plugin_is_released_with_an_error() {
    let harness = Harness::with_plugin(CHORUS, |p| MockPlugin {
        configurable: false,
        ..chorus(p)
    });
    harness.load(CHORUS);
    assert!(!harness.processor.is_hosted_plugin_loaded());
    assert_eq!(
        harness.processor.hosted_plugin_loading_error(),
        "Failed to configure hosted plugin"
    );
    assert_eq!(harness.probe().dropped, 1);
}

#[test]
fn close_before_the_load_completes_does_not_cancel_it() {
    let harness = Harness::with_plugin(CHORUS, chorus);
    harness.processor.load_plugin(CHORUS);
    harness.processor.close_hosted_plugin();
    assert!(harness.processor.is_currently_loading());

    harness.message_thread.run_all();
    assert!(harness.processor.is_hosted_plugin_loaded());
    assert_eq!(harness.processor.hosted_plugin_name(), "Acme - Chorus");

    harness.processor.close_hosted_plugin();
    assert!(!harness.processor.is_hosted_plugin_loaded());
    assert_eq!(harness.processor.hosted_plugin_path(), "");
    assert_eq!(harness.processor.hosted_instance_id(), None);
}

#[test]
fn save_then_restore_reloads_the_plugin_with_its_state() {
    let saved = {
        let harness = Harness::with_plugin(CHORUS, |p| MockPlugin {
            state: vec![0, 1, 2, 254, 255],
            ..chorus(p)
        });
        assert_eq!(harness.processor.state_information(), None);
        harness.load(CHORUS);
        harness.processor.state_information().unwrap()
    };

    let restored = HostedState::from_xml(&saved).unwrap().unwrap();
    assert_eq!(restored.plugin_path, CHORUS);

    let harness = Harness::with_plugin(CHORUS, chorus);
    harness.processor.set_state_information(&saved).unwrap();
    assert!(harness.processor.is_currently_loading());
    harness.message_thread.run_all();

    assert_eq!(harness.processor.hosted_plugin_path(), CHORUS);
    assert_eq!(harness.probe().applied_states, vec![vec![0, 1, 2, 254, 255]]);
}

#[test]
fn stashed_state_is_dropped_when_the_restore_fails() {
    let harness = Harness::with_plugin(CHORUS, chorus);
    let xml = HostedState {
        plugin_path: "/plugins/Gone.vst3".to_string(),
        inner_state: vec![9, 9, 9],
    }
    .to_xml();
    harness
        .processor
        .set_state_information(xml.as_bytes())
        .unwrap();
    harness.message_thread.run_all();
    assert_eq!(
        harness.processor.hosted_plugin_loading_error(),
        "No valid VST3 found"
    );

    harness.load(CHORUS);
    assert!(harness.probe().applied_states.is_empty());
}

#[test]
fn state_without_path_or_malformed_changes_nothing() {
    let harness = Harness::with_plugin(CHORUS, chorus);
    harness.load(CHORUS);
    let id = harness.processor.hosted_instance_id();

    harness
        .processor
        .set_state_information(b"<state><inner_state>AAEC</inner_state></state>")
        .unwrap();
    assert!(!harness.processor.is_currently_loading());
    assert_eq!(harness.message_thread.pending(), 0);

    assert!(harness
        .processor
        .set_state_information(b"<state><plugin_path>")
        .is_err());
    assert!(!harness.processor.is_currently_loading());
    assert_eq!(harness.processor.hosted_instance_id(), id);
    assert_eq!(harness.processor.hosted_plugin_path(), CHORUS);
}

#[test]
fn narrow_host_blocks_are_widened_for_the_plugin() {
    let harness = Harness::with_plugin(CHORUS, |p| MockPlugin {
        inputs: 4,
        outputs: 2,
        ..chorus(p)
    });
    harness.load(CHORUS);

    let mut left = vec![0.25f32; 16];
    let mut right = vec![-0.5f32; 16];
    let mut channels: Vec<&mut [f32]> = vec![&mut left[..], &mut right[..]];
    let mut midi = MidiBuffer::default();
    assert!(harness
        .processor
        .process_block(&mut channels, 16, &mut midi, None));

    let probe = harness.probe();
    let seen = &probe.seen_blocks[0];
    assert_eq!(seen.len(), 4);
    assert!(seen[0].iter().all(|&s| s == 0.25));
    assert!(seen[1].iter().all(|&s| s == -0.5));
    assert!(seen[2].iter().all(|&s| s == 0.0));
    assert!(seen[3].iter().all(|&s| s == 0.0));
    drop(probe);

    assert!(left.iter().all(|&s| s == 1.0));
    assert!(right.iter().all(|&s| s == 2.0));
}

#[test]
fn bypassed_blocks_use_the_bypass_entry_point() {
    let harness = Harness::with_plugin(CHORUS, chorus);
    let mut left = vec![0.5f32; 8];
    let mut channels: Vec<&mut [f32]> = vec![&mut left[..]];
    let mut midi = MidiBuffer::default();
    assert!(!harness
        .processor
        .process_block_bypassed(&mut channels, 8, &mut midi));

    harness.load(CHORUS);
    let mut channels: Vec<&mut [f32]> = vec![&mut left[..]];
    assert!(harness
        .processor
        .process_block_bypassed(&mut channels, 8, &mut midi));
    assert_eq!(harness.probe().bypassed_blocks, 1);
    assert!(harness.probe().seen_blocks.is_empty());
}

#[test]
fn prepare_re_prepares_the_hosted_plugin() {
    let harness = Harness::with_plugin(CHORUS, chorus);
    harness.load(CHORUS);
    harness.processor.prepare_to_play(96_000.0, 256);
    assert_eq!(harness.probe().prepared, vec![(48_000.0, 64), (96_000.0, 256)]);
    assert_eq!(
        harness.processor.playback(),
        PlaybackConfig {
            sample_rate: 96_000.0,
            block_size: 256
        }
    );
}

#[test]
fn inline_dispatch_completes_the_load_synchronously() {
    let format = Arc::new(common::MockFormat::default());
    format.add(Path::new(CHORUS), vec![chorus(Path::new(CHORUS))]);
    let mut formats = FormatManager::new(Arc::new(CurrentThread));
    formats.add_format(format.clone());
    let processor = HostProcessor::new(
        formats,
        PlaybackConfig {
            sample_rate: 44_100.0,
            block_size: 512,
        },
    );
    processor.load_plugin(CHORUS);
    assert!(processor.is_hosted_plugin_loaded());
}

struct EditorFixture {
    harness: Harness,
    load_queue: Arc<ManualDispatcher>,
    _dir: tempfile::TempDir,
    chorus: String,
}

impl EditorFixture {
    fn new(editor: EditorKind) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let chorus_path = dir.path().join("Chorus.vst3");
        let broken_path = dir.path().join("Broken.vst3");
        std::fs::write(&chorus_path, b"").unwrap();
        std::fs::write(&broken_path, b"").unwrap();

        let harness = Harness::new();
        harness.format.add(
            &chorus_path,
            vec![MockPlugin {
                editor,
                ..chorus(&chorus_path)
            }],
        );
        Self {
            harness,
            load_queue: Arc::new(ManualDispatcher::default()),
            chorus: chorus_path.to_string_lossy().into_owned(),
            _dir: dir,
        }
    }

    fn model(&self) -> EditorModel {
        EditorModel::new(
            self.harness.processor.clone(),
            PluginBrowser::new(self._dir.path()),
            self.load_queue.clone(),
        )
    }

    fn pump(&self, model: &mut EditorModel) {
        self.load_queue.run_all();
        self.harness.message_thread.run_all();
        model.poll_processor_events();
    }
}

#[test]
fn editor_starts_in_browsing_state() {
    let fixture = EditorFixture::new(EditorKind::None);
    let mut model = fixture.model();

    let view = model.view();
    assert!(view.browser_visible);
    assert!(view.load_button_visible);
    assert!(!view.load_button_enabled);
    assert!(!view.close_button_visible);
    assert_eq!(view.status_text, NO_PLUGIN_TEXT);
    assert_eq!(model.editor_size(), (650, 500));

    assert!(model.take_focus_request());
    assert!(!model.take_focus_request());

    model.select_row(Some(1));
    assert!(model.view().load_button_enabled);
    model.set_search_text("broken");
    assert!(!model.view().load_button_enabled);
}

#[test]
fn editor_walks_through_a_load_and_close() {
    let fixture = EditorFixture::new(EditorKind::None);
    let mut model = fixture.model();

    // Rows are sorted: Broken, Chorus.
    model.select_row(Some(1));
    model.load_selected_plugin();
    let view = model.view();
    assert_eq!(view.status_text, "Loading...");
    assert!(view.browser_covered);
    assert!(!view.load_button_enabled);
    assert_eq!(fixture.load_queue.pending(), 1);
    assert!(!fixture.harness.processor.is_currently_loading());

    fixture.pump(&mut model);
    let view = model.view();
    assert!(!view.browser_visible);
    assert!(!view.load_button_visible);
    assert!(view.close_button_visible);
    assert_eq!(view.status_text, "Acme - Chorus (no editor)");
    assert_eq!(view.status_tone, StatusTone::Normal);
    assert_eq!(fixture.harness.processor.hosted_plugin_path(), fixture.chorus);

    model.close_plugin();
    let view = model.view();
    assert!(view.browser_visible);
    assert!(!view.close_button_visible);
    assert!(view.load_button_enabled);
    assert_eq!(view.status_text, NO_PLUGIN_TEXT);
    assert!(!fixture.harness.processor.is_hosted_plugin_loaded());
}

#[test]
fn load_errors_show_only_after_a_load_attempt() {
    let fixture = EditorFixture::new(EditorKind::None);
    let mut model = fixture.model();

    model.row_double_clicked(0);
    assert_eq!(model.view().status_text, "Loading...");
    fixture.pump(&mut model);
    assert_eq!(model.view().status_text, "No valid VST3 found");
    assert_eq!(model.view().status_tone, StatusTone::Error);
    assert!(model.view().browser_visible);
    assert!(!model.view().browser_covered);

    // A window opened later does not repeat the old error.
    let reopened = fixture.model();
    assert_eq!(reopened.view().status_text, NO_PLUGIN_TEXT);
    assert_eq!(reopened.view().status_tone, StatusTone::Normal);
}

#[test]
fn generic_editor_sizes_the_window() {
    let fixture = EditorFixture::new(EditorKind::Generic);
    let mut model = fixture.model();
    model.load_plugin(Path::new(&fixture.chorus));
    fixture.pump(&mut model);

    assert!(model.has_hosted_editor());
    assert_eq!(model.view().status_text, "Acme - Chorus");
    assert_eq!(model.content_size(), (650, 84));
    assert_eq!(model.editor_size(), (650, 84 + 65));
}

#[test]
fn editor_model_picks_up_an_already_hosted_plugin() {
    let fixture = EditorFixture::new(EditorKind::Generic);
    fixture.harness.load(&fixture.chorus);

    let model = fixture.model();
    assert!(model.has_hosted_editor());
    assert!(model.view().close_button_visible);
    assert_eq!(model.view().status_text, "Acme - Chorus");
}

#[cfg(not(windows))]
#[test]
fn native_editor_is_attached_resized_and_detached() {
    let fixture = EditorFixture::new(EditorKind::Native {
        width: 300,
        height: 200,
    });
    let mut model = fixture.model();
    model.open(ParentHandle::X11Window(7));
    model.load_plugin(Path::new(&fixture.chorus));
    fixture.pump(&mut model);

    assert_eq!(model.editor_size(), (300, 265));
    assert_eq!(
        fixture.harness.probe().view_events,
        vec!["attach X11EmbedWindowID".to_string()]
    );

    fixture.harness.probe().pending_resize = Some((400, 320));
    assert!(model.sync_hosted_view_size());
    assert_eq!(model.editor_size(), (400, 385));
    assert!(!model.sync_hosted_view_size());

    model.close_window();
    assert_eq!(
        fixture.harness.probe().view_events.last().map(String::as_str),
        Some("detach")
    );
}

#[test]
fn restore_during_a_load_runs_after_it() {
    let harness = Harness::with_plugin(CHORUS, chorus);
    harness
        .format
        .add(Path::new(DELAY), vec![stereo(effect(Path::new(DELAY), "Acme", "Delay"))]);
    let xml = HostedState {
        plugin_path: DELAY.to_string(),
        inner_state: vec![7, 7, 7],
    }
    .to_xml();

    harness.processor.load_plugin(CHORUS);
    harness
        .processor
        .set_state_information(xml.as_bytes())
        .unwrap();
    assert_eq!(harness.message_thread.pending(), 1);

    harness.message_thread.run_all();
    assert_eq!(harness.processor.hosted_plugin_path(), DELAY);
    assert_eq!(harness.processor.hosted_plugin_name(), "Acme - Delay");
    assert_eq!(harness.format.creates(), 2);
    let probe = harness.probe();
    assert_eq!(probe.applied_states, vec![vec![7, 7, 7]]);
    assert_eq!(probe.dropped, 1);
}

#[cfg(not(windows))]
#[test]
fn restore_detaches_the_editor_before_destroying_its_instance() {
    let fixture = EditorFixture::new(EditorKind::Native {
        width: 300,
        height: 200,
    });
    let mut model = fixture.model();
    model.open(ParentHandle::X11Window(7));
    model.load_plugin(Path::new(&fixture.chorus));
    fixture.pump(&mut model);
    assert!(model.has_hosted_editor());

    let processor = fixture.harness.processor.clone();
    let saved = processor.state_information().unwrap();
    processor.set_state_information(&saved).unwrap();
    assert_eq!(fixture.harness.probe().dropped, 0);
    assert_eq!(processor.retired_instance_count(), 1);

    assert!(model.poll_processor_events());
    assert!(!model.has_hosted_editor());
    assert_eq!(model.view().status_text, "Loading...");
    {
        let probe = fixture.harness.probe();
        assert_eq!(
            probe.view_events,
            vec!["attach X11EmbedWindowID".to_string(), "detach".to_string()]
        );
        assert_eq!(probe.dropped, 1);
    }
    assert_eq!(processor.retired_instance_count(), 0);

    fixture.pump(&mut model);
    assert!(model.has_hosted_editor());
    let probe = fixture.harness.probe();
    assert_eq!(probe.view_events.len(), 3);
    assert_eq!(probe.applied_states.len(), 1);
}

#[test]
fn released_instance_outlives_its_generic_editor() {
    let fixture = EditorFixture::new(EditorKind::Generic);
    fixture.harness.load(&fixture.chorus);
    let mut model = fixture.model();
    assert!(model.has_hosted_editor());

    fixture.harness.processor.load_plugin(&fixture.chorus);
    assert_eq!(fixture.harness.probe().dropped, 0);
    assert!(model.poll_processor_events());
    assert_eq!(fixture.harness.probe().dropped, 1);

    fixture.pump(&mut model);
    assert!(model.has_hosted_editor());

    // Closing the window releases the lease on a still-hosted instance.
    drop(model);
    assert_eq!(fixture.harness.processor.retired_instance_count(), 0);
    assert!(fixture.harness.processor.is_hosted_plugin_loaded());
    assert_eq!(fixture.harness.probe().dropped, 1);
}

#[test]
fn focus_request_is_spent_even_when_opened_while_hosting() {
    let fixture = EditorFixture::new(EditorKind::Generic);
    fixture.harness.load(&fixture.chorus);
    let mut model = fixture.model();
    assert!(!model.take_focus_request());

    model.close_plugin();
    assert!(model.view().browser_visible);
    assert!(!model.take_focus_request());
}

#[test]
fn window_size_is_requested_once_per_change() {
    let fixture = EditorFixture::new(EditorKind::Generic);
    let mut model = fixture.model();
    assert_eq!(model.take_size_request((650, 500)), None);

    model.load_plugin(Path::new(&fixture.chorus));
    fixture.pump(&mut model);
    assert_eq!(model.take_size_request((650, 500)), Some((650, 149)));
    assert_eq!(model.take_size_request((650, 500)), None);
    assert_eq!(model.take_size_request((650, 149)), None);

    model.close_plugin();
    assert_eq!(model.take_size_request((650, 149)), Some((650, 500)));
}
