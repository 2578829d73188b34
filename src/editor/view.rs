use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use nih_plug::prelude::{Editor, GuiContext, ParentWindowHandle};
use nih_plug_egui::egui::{self, Align2, Color32, FontId, Rect, RichText, Sense};
use nih_plug_egui::{create_egui_editor, EguiState};

use super::{
    EditorModel, StatusTone, BUTTON_HEIGHT, BUTTON_TOP_SPACING, LABEL_HEIGHT, MARGIN,
};
use crate::browser;
use crate::config::LoaderConfig;
use crate::host::view::GenericEditor;
use crate::host::{HostProcessor, HostedEditor, ParentHandle};

const BACKGROUND: Color32 = Color32::from_rgb(0x1a, 0x1a, 0x1a);
const ACCENT: Color32 = Color32::from_rgb(0xa4, 0x19, 0x3d);
const TEXT: Color32 = Color32::from_rgb(0xff, 0xdf, 0xb9);
const SEARCH_BACKGROUND: Color32 = Color32::from_rgb(0x2a, 0x2a, 0x2a);
const HINT: Color32 = Color32::from_rgba_premultiplied(0x80, 0x70, 0x5c, 0x80);
const COVER: Color32 = Color32::from_rgba_premultiplied(0x1a, 0x1a, 0x1a, 0x1a);

const SEARCH_HEIGHT: f32 = 35.0;
const ROW_HEIGHT: f32 = 30.0;
const SEARCH_HINT: &str = "Search plugins...";

type SharedModel = Arc<Mutex<Option<EditorModel>>>;

fn lock(model: &Mutex<Option<EditorModel>>) -> MutexGuard<'_, Option<EditorModel>> {
    match model.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The wrapper's editor: the egui window plus the hosted plugin's own view
/// attached next to it. A fresh [`EditorModel`] lives for as long as the
/// window is open.
pub fn create_editor(
    editor_state: Arc<EguiState>,
    processor: HostProcessor,
    config: LoaderConfig,
) -> Option<Box<dyn Editor>> {
    let model: SharedModel = Arc::new(Mutex::new(None));
    let state = editor_state.clone();
    let inner = create_egui_editor(
        editor_state,
        model.clone(),
        |_ctx, _model| {},
        move |egui_ctx, _setter, model| {
            let mut guard = lock(model);
            let Some(model) = guard.as_mut() else {
                egui::CentralPanel::default()
                    .frame(egui::Frame::none().fill(BACKGROUND))
                    .show(egui_ctx, |_ui| {});
                return;
            };
            if model.poll_processor_events() {
                egui_ctx.request_repaint();
            }
            model.sync_hosted_view_size();

            if let Some(wanted) = model.take_size_request(state.size()) {
                let outcome = state.set_requested_size(wanted);
                log::debug!("Requested editor size {:?}: {:?}", wanted, outcome);
            }

            draw(egui_ctx, model);
            egui_ctx.request_repaint_after(Duration::from_millis(50));
        },
    )?;
    Some(Box::new(LoaderEditor {
        inner,
        model,
        processor,
        config,
    }))
}

struct LoaderEditor {
    inner: Box<dyn Editor>,
    model: SharedModel,
    processor: HostProcessor,
    config: LoaderConfig,
}

impl Editor for LoaderEditor {
    fn spawn(
        &self,
        parent: ParentWindowHandle,
        context: Arc<dyn GuiContext>,
    ) -> Box<dyn Any + Send> {
        match EditorModel::with_config(self.processor.clone(), &self.config) {
            Ok(model) => *lock(&self.model) = Some(model),
            Err(e) => log::error!("Could not start the editor's load queue: {:#}", e),
        }
        let window = self.inner.spawn(parent, context);
        if let Some(model) = lock(&self.model).as_mut() {
            model.open(parent_handle(parent));
        }
        Box::new(OpenWindow {
            model: self.model.clone(),
            _window: window,
        })
    }

    fn size(&self) -> (u32, u32) {
        self.inner.size()
    }

    fn set_scale_factor(&self, factor: f32) -> bool {
        self.inner.set_scale_factor(factor)
    }

    fn param_value_changed(&self, id: &str, normalized_value: f32) {
        self.inner.param_value_changed(id, normalized_value)
    }

    fn param_modulation_changed(&self, id: &str, modulation_offset: f32) {
        self.inner.param_modulation_changed(id, modulation_offset)
    }

    fn param_values_changed(&self) {
        self.inner.param_values_changed()
    }
}

fn parent_handle(parent: ParentWindowHandle) -> ParentHandle {
    match parent {
        ParentWindowHandle::X11Window(window) => ParentHandle::X11Window(window),
        ParentWindowHandle::AppKitNsView(view) => ParentHandle::AppKitNsView(view as usize),
        ParentWindowHandle::Win32Hwnd(hwnd) => ParentHandle::Win32Hwnd(hwnd as usize),
    }
}

/// Tears the model down, hosted view first, before the egui window closes.
struct OpenWindow {
    model: SharedModel,
    _window: Box<dyn Any + Send>,
}

impl Drop for OpenWindow {
    fn drop(&mut self) {
        let model = lock(&self.model).take();
        if let Some(mut model) = model {
            model.close_window();
        }
    }
}

fn draw(ctx: &egui::Context, model: &mut EditorModel) {
    egui::CentralPanel::default()
        .frame(egui::Frame::none().fill(BACKGROUND))
        .show(ctx, |ui| {
            let focus_search = model.take_focus_request();
            let origin = ui.max_rect().min;
            let (content_width, content_height) = model.content_size();
            let (width, _) = model.editor_size();
            let content = Rect::from_min_size(
                origin,
                egui::vec2(content_width as f32, content_height as f32),
            );

            let view = model.view().clone();
            if view.browser_visible {
                draw_browser(ui, content, model, view.browser_covered, focus_search);
            } else if let Some(HostedEditor::Generic(editor)) = model.hosted_editor() {
                draw_generic_editor(ui, content, editor);
            }

            let button_top = content.bottom() + BUTTON_TOP_SPACING as f32;
            let button_rect = Rect::from_min_size(
                egui::pos2(origin.x + MARGIN as f32, button_top),
                egui::vec2(
                    width.saturating_sub(2 * MARGIN) as f32,
                    BUTTON_HEIGHT as f32,
                ),
            );
            if view.load_button_visible {
                let clicked = ui
                    .add_enabled_ui(view.load_button_enabled, |ui| {
                        ui.put(button_rect, accent_button("Load Plugin"))
                    })
                    .inner
                    .clicked();
                if clicked {
                    model.load_selected_plugin();
                }
            }
            if view.close_button_visible
                && ui.put(button_rect, accent_button("Close Plugin")).clicked()
            {
                model.close_plugin();
            }

            let label_rect = button_rect.translate(egui::vec2(0.0, BUTTON_HEIGHT as f32));
            let label_rect = Rect::from_min_size(
                label_rect.min,
                egui::vec2(label_rect.width(), LABEL_HEIGHT as f32),
            );
            let colour = match view.status_tone {
                StatusTone::Normal => TEXT,
                StatusTone::Error => Color32::RED,
            };
            ui.put(
                label_rect,
                egui::Label::new(RichText::new(&view.status_text).color(colour)),
            );
        });
}

fn accent_button(text: &str) -> egui::Button {
    egui::Button::new(RichText::new(text).color(TEXT)).fill(ACCENT)
}

fn draw_browser(
    ui: &mut egui::Ui,
    area: Rect,
    model: &mut EditorModel,
    covered: bool,
    focus_search: bool,
) {
    let search_rect = Rect::from_min_size(area.min, egui::vec2(area.width(), SEARCH_HEIGHT))
        .shrink(5.0);
    let mut search = model.browser().search_text().to_string();
    let search_box = egui::TextEdit::singleline(&mut search)
        .hint_text(RichText::new(SEARCH_HINT).color(HINT))
        .text_color(TEXT)
        .frame(false);
    ui.painter().rect_filled(search_rect, 0.0, SEARCH_BACKGROUND);
    let response = ui.add_enabled_ui(!covered, |ui| ui.put(search_rect, search_box)).inner;
    if focus_search {
        response.request_focus();
    }
    if response.changed() {
        model.set_search_text(&search);
    }

    let list_rect = Rect::from_min_max(
        egui::pos2(area.left(), area.top() + SEARCH_HEIGHT),
        area.max,
    );
    let rows = model.browser().num_rows();
    let selected = model.browser().selected_row();
    let names: Vec<String> = model
        .browser()
        .filtered_plugins()
        .iter()
        .map(|path| browser::display_name(path))
        .collect();

    let mut clicked = None;
    let mut double_clicked = None;
    ui.allocate_ui_at_rect(list_rect, |ui| {
        egui::ScrollArea::vertical()
            .auto_shrink([false; 2])
            .show_rows(ui, ROW_HEIGHT, rows, |ui, range| {
                for row in range {
                    let (rect, response) = ui.allocate_exact_size(
                        egui::vec2(list_rect.width(), ROW_HEIGHT),
                        if covered { Sense::hover() } else { Sense::click() },
                    );
                    paint_row(ui, rect, &names[row], selected == Some(row));
                    if response.double_clicked() {
                        double_clicked = Some(row);
                    } else if response.clicked() {
                        clicked = Some(row);
                    }
                }
            });
    });

    if let Some(row) = double_clicked {
        model.row_double_clicked(row);
    } else if let Some(row) = clicked {
        model.select_row(Some(row));
    }

    if covered {
        ui.painter().rect_filled(area, 0.0, COVER);
    }
}

fn paint_row(ui: &egui::Ui, rect: Rect, name: &str, selected: bool) {
    let painter = ui.painter();
    let (fill, ring, hole) = if selected {
        (ACCENT, TEXT, ACCENT)
    } else {
        (BACKGROUND, ACCENT, BACKGROUND)
    };
    painter.rect_filled(rect, 0.0, fill);

    let icon = rect.height() * 0.6;
    let centre = egui::pos2(rect.left() + 10.0 + icon / 2.0, rect.center().y);
    painter.circle_filled(centre, icon / 2.0, ring);
    painter.circle_filled(centre, icon * 0.15, hole);

    painter.text(
        egui::pos2(rect.left() + 20.0 + icon, rect.center().y),
        Align2::LEFT_CENTER,
        name,
        FontId::proportional(rect.height() * 0.5),
        TEXT,
    );
}

fn draw_generic_editor(ui: &mut egui::Ui, area: Rect, editor: &GenericEditor) {
    let access = editor.access();
    ui.allocate_ui_at_rect(area.shrink(MARGIN as f32 / 2.0), |ui| {
        egui::ScrollArea::vertical()
            .auto_shrink([false; 2])
            .show(ui, |ui| {
                egui::Grid::new("hosted-parameters")
                    .num_columns(3)
                    .min_row_height(GenericEditor::ROW_HEIGHT as f32)
                    .show(ui, |ui| {
                        for param in editor.parameters() {
                            ui.label(RichText::new(&param.title).color(TEXT));
                            let mut value = access.normalized(param.id);
                            let slider = egui::Slider::new(&mut value, 0.0..=1.0).show_value(false);
                            let response = ui.add_enabled(!param.read_only, slider);
                            if response.changed() {
                                access.set_normalized(param.id, value);
                            }
                            let mut shown = access.display_value(param.id, value);
                            if !param.units.is_empty() {
                                shown.push(' ');
                                shown.push_str(&param.units);
                            }
                            ui.label(RichText::new(shown).color(TEXT));
                            ui.end_row();
                        }
                    });
            });
    });
}
