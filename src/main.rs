#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use gridseq::{
    midi_note_name, AudioOutput, Command, Config, MidiInputDevice, MidiOutputDevice,
    NoteSink, Schedule, Session, Synth, TickTimer, NUM_CHANNELS, NUM_STEPS,
};

#[cfg(feature = "gui")]
const CONFIG_FILE: &str = "gridseq.json";

#[cfg(feature = "gui")]
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load(CONFIG_FILE)?;
    let initial_file = std::env::args().nth(1);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 520.0])
            .with_title("GRIDSEQ - Step Sequencer"),
        ..Default::default()
    };

    eframe::run_native(
        "GRIDSEQ",
        options,
        Box::new(move |cc| {
            Ok(Box::new(SequencerApp::new(
                config,
                initial_file,
                cc.egui_ctx.clone(),
            )))
        }),
    )
    .map_err(|e| anyhow::anyhow!("failed to run UI: {}", e))
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

/// Routes sequencer output to whichever destinations are switched on.
#[cfg(feature = "gui")]
struct Outputs<'a> {
    synth: &'a mut Synth,
    synth_enabled: bool,
    midi: &'a mut MidiOutputDevice,
}

#[cfg(feature = "gui")]
impl NoteSink for Outputs<'_> {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        if self.synth_enabled {
            NoteSink::note_on(&mut *self.synth, channel, note, velocity);
        }
        self.midi.note_on(channel, note, velocity);
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        if self.synth_enabled {
            NoteSink::note_off(&mut *self.synth, channel, note);
        }
        self.midi.note_off(channel, note);
    }

    fn all_notes_off(&mut self) {
        // the synth may have been muted mid-note
        NoteSink::all_notes_off(&mut *self.synth);
        self.midi.all_notes_off();
    }
}

#[cfg(feature = "gui")]
struct SequencerApp {
    session: Session,
    timer: TickTimer,
    audio_output: AudioOutput,
    synth: Synth,
    midi_output: MidiOutputDevice,
    midi_input: Option<MidiInputDevice>,
    config: Config,
    ctx: egui::Context,

    // UI state
    path_input: String,
    selected_channel: usize,
    synth_enabled: bool,
    volume: f32,
    available_midi_ports: Vec<String>,
    available_input_ports: Vec<String>,
    selected_port: Option<usize>,
    selected_input: Option<usize>,
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new(config: Config, initial_file: Option<String>, ctx: egui::Context) -> Self {
        let audio_output = AudioOutput::new(&config.synth).unwrap_or_else(|e| {
            log::warn!("{}, continuing without audio", e);
            AudioOutput::silent(&config.synth)
        });
        let synth = audio_output.synth().clone();
        let midi_output = MidiOutputDevice::new(&config.midi_client_name);
        let available_midi_ports = MidiOutputDevice::available_ports(&config.midi_client_name);
        let available_input_ports = MidiInputDevice::available_ports(&config.midi_client_name);

        let mut app = Self {
            session: Session::new(),
            timer: TickTimer::new(),
            volume: synth.volume(),
            audio_output,
            synth,
            midi_output,
            midi_input: None,
            config,
            ctx,
            path_input: initial_file.clone().unwrap_or_else(|| "pattern.mid".to_string()),
            selected_channel: 0,
            synth_enabled: true,
            available_midi_ports,
            available_input_ports,
            selected_port: None,
            selected_input: None,
        };

        if let Some(path) = initial_file {
            app.run(Command::Load(path.into()));
        }
        app
    }

    /// Applies a command and hands its schedule to the timer.
    fn run(&mut self, command: Command) {
        let mut outputs = Outputs {
            synth: &mut self.synth,
            synth_enabled: self.synth_enabled,
            midi: &mut self.midi_output,
        };
        match self.session.apply(command, &mut outputs) {
            Ok(schedule) => self.timer.apply(schedule),
            Err(e) => log::error!("{}", e),
        }
    }

    fn handle_ticks(&mut self) {
        if !self.timer.poll() {
            return;
        }
        let mut outputs = Outputs {
            synth: &mut self.synth,
            synth_enabled: self.synth_enabled,
            midi: &mut self.midi_output,
        };
        let schedule = self.session.on_tick(&mut outputs);
        self.timer.apply(schedule);
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let (space, up, down, plus, minus) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::Space),
                i.key_pressed(egui::Key::ArrowUp),
                i.key_pressed(egui::Key::ArrowDown),
                i.key_pressed(egui::Key::Plus) || i.key_pressed(egui::Key::Equals),
                i.key_pressed(egui::Key::Minus),
            )
        });

        if space {
            self.toggle_transport();
        }
        if up && self.selected_channel > 0 {
            self.selected_channel -= 1;
        }
        if down && self.selected_channel + 1 < NUM_CHANNELS {
            self.selected_channel += 1;
        }
        if plus {
            self.run(Command::AdjustTempo { delta: 1 });
        }
        if minus {
            self.run(Command::AdjustTempo { delta: -1 });
        }
    }

    fn toggle_transport(&mut self) {
        if self.session.is_playing() {
            self.run(Command::StopPlayback);
        } else {
            self.run(Command::StartPlayback);
        }
    }

    fn connect_input(&mut self, port_index: usize) {
        // drop the old connection before opening a new one
        self.midi_input = None;
        let ctx = self.ctx.clone();
        match MidiInputDevice::connect(
            port_index,
            &self.config.midi_client_name,
            self.synth.clone(),
            move |_| ctx.request_repaint(),
        ) {
            Ok(input) => {
                self.midi_input = Some(input);
                self.selected_input = Some(port_index);
            }
            Err(e) => log::error!("{}", e),
        }
    }

    fn file_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("File:");
            ui.text_edit_singleline(&mut self.path_input);
            let path = self.path_input.trim().to_string();
            if ui.button("Load").clicked() && !path.is_empty() {
                self.run(Command::Load(path.clone().into()));
            }
            if ui.button("New").clicked() && !path.is_empty() {
                self.run(Command::Create(path.into()));
            }
            if let Some(current) = self.session.file_path() {
                ui.label(format!("({})", current.display()));
            }
        });
    }

    fn device_controls(&mut self, ui: &mut egui::Ui) {
        let mut output_changed = None;
        let mut input_changed = None;

        ui.horizontal(|ui| {
            ui.label("MIDI Output:");
            if self.available_midi_ports.is_empty() {
                ui.label("No MIDI ports available");
            } else {
                egui::ComboBox::from_id_source("midi_out")
                    .selected_text(
                        self.selected_port
                            .and_then(|i| self.available_midi_ports.get(i))
                            .map(String::as_str)
                            .unwrap_or("Select port..."),
                    )
                    .show_ui(ui, |ui| {
                        for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                            if ui
                                .selectable_label(self.selected_port == Some(i), port_name)
                                .clicked()
                            {
                                output_changed = Some(i);
                            }
                        }
                    });
            }

            ui.add_space(20.0);

            ui.label("MIDI Input:");
            if self.available_input_ports.is_empty() {
                ui.label("No MIDI ports available");
            } else {
                egui::ComboBox::from_id_source("midi_in")
                    .selected_text(
                        self.selected_input
                            .and_then(|i| self.available_input_ports.get(i))
                            .map(String::as_str)
                            .unwrap_or("Select port..."),
                    )
                    .show_ui(ui, |ui| {
                        for (i, port_name) in self.available_input_ports.iter().enumerate() {
                            if ui
                                .selectable_label(self.selected_input == Some(i), port_name)
                                .clicked()
                            {
                                input_changed = Some(i);
                            }
                        }
                    });
            }
        });

        if let Some(port_idx) = output_changed {
            match self.midi_output.connect(port_idx) {
                Ok(()) => self.selected_port = Some(port_idx),
                Err(e) => {
                    self.selected_port = None;
                    log::error!("{}", e);
                }
            }
        }
        if let Some(port_idx) = input_changed {
            self.connect_input(port_idx);
        }
    }

    fn transport_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let label = if self.session.is_playing() {
                "⏹ Stop"
            } else {
                "▶ Play"
            };
            if ui.button(label).clicked() {
                self.toggle_transport();
            }

            ui.add_space(20.0);

            ui.label("BPM:");
            if ui.button("-").clicked() {
                self.run(Command::AdjustTempo { delta: -1 });
            }
            ui.label(self.session.bpm().to_string());
            if ui.button("+").clicked() {
                self.run(Command::AdjustTempo { delta: 1 });
            }

            ui.add_space(20.0);

            ui.checkbox(&mut self.synth_enabled, "Synth");
            ui.label("Volume:");
            if ui
                .add(egui::Slider::new(&mut self.volume, 0.0..=1.0))
                .changed()
            {
                self.synth.set_volume(self.volume);
            }
        });
    }

    fn step_grid(&mut self, ui: &mut egui::Ui) {
        let (current_step, playing) = self.session.playhead();
        let mut command = None;

        egui::Grid::new("steps").spacing([4.0, 4.0]).show(ui, |ui| {
            for channel in 0..NUM_CHANNELS {
                let selected = channel == self.selected_channel;
                if ui
                    .selectable_label(selected, format!("Ch {}", channel + 1))
                    .clicked()
                {
                    self.selected_channel = channel;
                }

                for step in 0..NUM_STEPS {
                    let cell = self.session.grid().channel(channel)[step];
                    let is_current = playing && current_step == step;

                    let button = egui::Button::new(midi_note_name(cell.note))
                        .min_size(egui::vec2(44.0, 36.0))
                        .fill(if is_current && cell.active {
                            egui::Color32::from_rgb(100, 200, 100)
                        } else if cell.active {
                            egui::Color32::from_rgb(60, 60, 200)
                        } else if is_current {
                            egui::Color32::from_rgb(70, 70, 70)
                        } else {
                            egui::Color32::from_rgb(40, 40, 40)
                        });

                    let response = ui.add(button);
                    if response.clicked() {
                        command = Some(Command::ToggleStep { channel, step });
                    } else if response.secondary_clicked() {
                        command = Some(Command::AdjustNote {
                            channel,
                            step,
                            delta: -1,
                        });
                    } else if response.middle_clicked() {
                        command = Some(Command::AdjustNote {
                            channel,
                            step,
                            delta: 1,
                        });
                    } else if response.hovered() {
                        let scroll = ui.input(|i| i.raw_scroll_delta.y);
                        if scroll != 0.0 {
                            command = Some(Command::AdjustNote {
                                channel,
                                step,
                                delta: if scroll > 0.0 { 1 } else { -1 },
                            });
                        }
                    }
                }

                if ui.button("Clear").clicked() {
                    command = Some(Command::ClearChannel { channel });
                }
                ui.end_row();
            }
        });

        if let Some(command) = command {
            self.run(command);
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_ticks();
        self.handle_keys(ctx);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("GRIDSEQ - Step Sequencer");
            ui.add_space(10.0);

            self.file_controls(ui);
            self.device_controls(ui);
            ui.add_space(10.0);
            self.transport_controls(ui);
            ui.add_space(20.0);
            self.step_grid(ui);

            ui.separator();
            ui.label("Click a step to toggle it, scroll or right/middle click to change its note");
            if !self.session.message().is_empty() {
                ui.label(self.session.message());
            }
            if !self.audio_output.has_device() {
                ui.colored_label(egui::Color32::YELLOW, "⚠ No audio device - MIDI output only");
            }
            if !self.midi_output.is_connected() {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    "⚠ No MIDI output connected - audio playback only",
                );
            }
        });

        if self.session.is_playing() {
            // repaint often enough to catch every tick on time
            ctx.request_repaint_after(std::time::Duration::from_millis(5));
        }
    }
}

#[cfg(feature = "gui")]
impl Drop for SequencerApp {
    fn drop(&mut self) {
        self.timer.apply(Schedule::Cancel);
        self.session.stop_playback(&mut self.midi_output);
        self.midi_input = None;
        self.synth.shutdown();
    }
}
