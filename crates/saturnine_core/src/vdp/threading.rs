//! Render worker threads and their event queues.
//!
//! Every mutation of renderer-owned state travels through a single-producer
//! FIFO event queue; the host blocks on reply signals only at the few
//! genuine barriers (swap, erase, end of frame, save/load sync). With
//! threading disabled the same events are applied inline on the host
//! thread, so the rendering code has exactly one code path.

use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};

use crate::host::{FrameSink, VdpInitError, VdpOptions};
use crate::vdp::memory::SpriteFramebuffers;
use crate::vdp::regs2::InterlaceMode;
use crate::vdp::vdp1::{Control, Vdp1Renderer};
use crate::vdp::vdp2::{draw_line, FieldContext, FrameOutput, Vdp2RenderState};
use crate::vdp::regs1::Vdp1Regs;

// -----------------------------------------------------------------------------
// VDP1 worker

#[derive(Debug)]
pub enum Vdp1Event {
    Reset,
    VramWrite8 { addr: u32, value: u8 },
    VramWrite16 { addr: u32, value: u16 },
    RegWrite { addr: u32, value: u16 },
    SetInterlace(InterlaceMode),
    BeginFrame,
    Command { addr: u32, control: Control },
    /// FIFO drain point; replies on the done channel.
    Barrier,
    PostLoadSync(Box<Vdp1SyncData>),
    Shutdown,
}

#[derive(Debug)]
pub struct Vdp1SyncData {
    pub vram: crate::vdp::memory::Vdp1Vram,
    pub regs: Vdp1Regs,
    pub interlace: InterlaceMode,
}

pub enum Vdp1Backend {
    Inline(Box<Vdp1Renderer>),
    Threaded {
        tx: Sender<Vdp1Event>,
        done_rx: Receiver<()>,
        handle: Option<JoinHandle<()>>,
    },
}

impl Vdp1Backend {
    pub fn new(
        options: &VdpOptions,
        fbs: Arc<Mutex<SpriteFramebuffers>>,
    ) -> Result<Self, VdpInitError> {
        let renderer = Box::new(Vdp1Renderer::new(
            options.deinterlace,
            options.transparent_meshes,
        ));

        if !options.threaded_vdp1 {
            return Ok(Vdp1Backend::Inline(renderer));
        }

        let (tx, rx) = unbounded();
        let (done_tx, done_rx) = bounded(1);
        let handle = std::thread::Builder::new()
            .name("VDP1 render worker".into())
            .spawn(move || vdp1_worker(renderer, fbs, rx, done_tx))
            .map_err(|source| VdpInitError::WorkerSpawn {
                name: "VDP1",
                source,
            })?;

        Ok(Vdp1Backend::Threaded {
            tx,
            done_rx,
            handle: Some(handle),
        })
    }

    pub fn send(&mut self, fbs: &Mutex<SpriteFramebuffers>, event: Vdp1Event) {
        match self {
            Vdp1Backend::Inline(renderer) => {
                apply_vdp1_event(renderer, fbs, event);
            }
            Vdp1Backend::Threaded { tx, .. } => {
                let _ = tx.send(event);
            }
        }
    }

    /// Blocks until the worker has drained all events up to the barrier.
    pub fn barrier(&mut self) {
        match self {
            Vdp1Backend::Inline(_) => {}
            Vdp1Backend::Threaded { tx, done_rx, .. } => {
                let _ = tx.send(Vdp1Event::Barrier);
                let _ = done_rx.recv();
            }
        }
    }
}

impl Drop for Vdp1Backend {
    fn drop(&mut self) {
        if let Vdp1Backend::Threaded { tx, handle, .. } = self {
            let _ = tx.send(Vdp1Event::Shutdown);
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Applies one event. Returns `false` on shutdown.
fn apply_vdp1_event(
    renderer: &mut Vdp1Renderer,
    fbs: &Mutex<SpriteFramebuffers>,
    event: Vdp1Event,
) -> bool {
    match event {
        Vdp1Event::Reset => renderer.state.reset(),
        Vdp1Event::VramWrite8 { addr, value } => {
            renderer.state.vram.write_8(addr as usize, value);
        }
        Vdp1Event::VramWrite16 { addr, value } => {
            renderer.state.vram.write_16(addr as usize, value);
        }
        Vdp1Event::RegWrite { addr, value } => {
            renderer.state.regs.write(addr, value);
        }
        Vdp1Event::SetInterlace(mode) => renderer.state.interlace = mode,
        Vdp1Event::BeginFrame => renderer.begin_frame(),
        Vdp1Event::Command { addr, control } => {
            let mut fbs = fbs.lock().unwrap();
            renderer.execute_command(&mut fbs, addr, control);
        }
        Vdp1Event::Barrier => {}
        Vdp1Event::PostLoadSync(sync) => {
            renderer.state.vram = sync.vram;
            renderer.state.regs = sync.regs;
            renderer.state.interlace = sync.interlace;
        }
        Vdp1Event::Shutdown => return false,
    }
    true
}

fn vdp1_worker(
    mut renderer: Box<Vdp1Renderer>,
    fbs: Arc<Mutex<SpriteFramebuffers>>,
    rx: Receiver<Vdp1Event>,
    done_tx: Sender<()>,
) {
    profiling::register_thread!("VDP1 render worker");

    while let Ok(event) = rx.recv() {
        let is_barrier = matches!(
            event,
            Vdp1Event::Barrier | Vdp1Event::PostLoadSync(_)
        );
        let keep_running = apply_vdp1_event(&mut renderer, &fbs, event);
        if is_barrier {
            let _ = done_tx.send(());
        }
        if !keep_running {
            break;
        }
    }
}

// -----------------------------------------------------------------------------
// VDP2 worker

pub enum Vdp2Event {
    Reset,
    OddField(bool),
    LatchTvmd,
    SetResolution {
        hres: u32,
        vres: u32,
        exclusive: bool,
    },
    BeginFrame,
    DrawLine {
        vcnt: u32,
    },
    /// Flush the frame to the sink; replies on the done channel.
    EndFrame,
    /// Drain points before the host touches the sprite framebuffers.
    EraseBarrier,
    SwapBarrier,
    VramWrite8 {
        addr: u32,
        value: u8,
    },
    VramWrite16 {
        addr: u32,
        value: u16,
    },
    CramWrite8 {
        addr: u32,
        value: u8,
    },
    CramWrite16 {
        addr: u32,
        value: u16,
    },
    RegWrite {
        addr: u32,
        value: u16,
    },
    Vdp1RegWrite {
        addr: u32,
        value: u16,
    },
    PreSaveBarrier,
    PostLoadSync(Box<Vdp2SyncData>),
    Shutdown,
}

pub struct Vdp2SyncData {
    pub vram: crate::vdp::memory::Vdp2Vram,
    pub cram: crate::vdp::memory::Cram,
    pub regs2: crate::vdp::regs2::Vdp2Regs,
    pub regs1: Vdp1Regs,
}

/// The VDP2 render engine: shared state plus the primary field context and
/// the optional deinterlace companion.
pub struct Vdp2Engine {
    pub shared: Arc<RwLock<Vdp2RenderState>>,
    pub fbs: Arc<Mutex<SpriteFramebuffers>>,
    pub frame: Arc<Mutex<FrameOutput>>,
    primary: FieldContext,
    sink: Box<dyn FrameSink>,
    deint: DeintBackend,
}

enum DeintBackend {
    /// Deinterlacing disabled: only the primary field is drawn.
    Off,
    /// Alternate field drawn on this thread after the primary field.
    Inline(Box<FieldContext>),
    Worker {
        begin_tx: Sender<Option<u32>>,
        end_rx: Receiver<()>,
        handle: Option<JoinHandle<()>>,
    },
}

impl Vdp2Engine {
    pub fn new(
        options: &VdpOptions,
        fbs: Arc<Mutex<SpriteFramebuffers>>,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self, VdpInitError> {
        let shared = Arc::new(RwLock::new(Vdp2RenderState::new(options)));
        let frame = Arc::new(Mutex::new(FrameOutput::new()));

        let deint = if !options.deinterlace {
            DeintBackend::Off
        } else if options.threaded_deinterlacer && options.threaded_vdp2 {
            let (begin_tx, begin_rx) = bounded::<Option<u32>>(1);
            let (end_tx, end_rx) = bounded(1);
            let worker_shared = Arc::clone(&shared);
            let worker_fbs = Arc::clone(&fbs);
            let worker_frame = Arc::clone(&frame);
            let handle = std::thread::Builder::new()
                .name("VDP deinterlace worker".into())
                .spawn(move || {
                    deinterlace_worker(worker_shared, worker_fbs, worker_frame, begin_rx, end_tx)
                })
                .map_err(|source| VdpInitError::WorkerSpawn {
                    name: "deinterlace",
                    source,
                })?;
            DeintBackend::Worker {
                begin_tx,
                end_rx,
                handle: Some(handle),
            }
        } else {
            DeintBackend::Inline(Box::new(FieldContext::new()))
        };

        Ok(Vdp2Engine {
            shared,
            fbs,
            frame,
            primary: FieldContext::new(),
            sink,
            deint,
        })
    }

    /// Applies one event. Returns `false` on shutdown.
    pub fn handle_event(&mut self, event: Vdp2Event) -> bool {
        match event {
            Vdp2Event::Reset => {
                let mut shared = self.shared.write().unwrap();
                let options = VdpOptions {
                    deinterlace: shared.deinterlace,
                    transparent_meshes: shared.transparent_meshes,
                    restrict_extended_color_calc: shared.restrict_extended_color_calc,
                    apply_bitmap_delay_in_normal_modes: shared.apply_bitmap_delay_in_normal_modes,
                    ..VdpOptions::default()
                };
                let pal = shared.regs2.pal;
                *shared = Vdp2RenderState::new(&options);
                shared.regs2.pal = pal;
                drop(shared);
                self.frame.lock().unwrap().data.fill(0xFF00_0000);
            }
            Vdp2Event::OddField(odd) => {
                self.shared.write().unwrap().regs2.odd = odd;
            }
            Vdp2Event::LatchTvmd => {
                self.shared.write().unwrap().regs2.latch_tvmd();
            }
            Vdp2Event::SetResolution {
                hres,
                vres,
                exclusive,
            } => {
                {
                    let mut shared = self.shared.write().unwrap();
                    shared.hres = hres;
                    shared.vres = vres;
                    shared.exclusive_monitor = exclusive;
                }
                {
                    let mut frame = self.frame.lock().unwrap();
                    frame.width = hres;
                    frame.height = vres;
                }
                self.sink.resolution_changed(hres, vres);
            }
            Vdp2Event::BeginFrame => {
                self.shared.write().unwrap().init_frame();
            }
            Vdp2Event::DrawLine { vcnt } => self.draw_line_event(vcnt),
            Vdp2Event::EndFrame => {
                let frame = self.frame.lock().unwrap();
                let pixels = (frame.width * frame.height) as usize;
                self.sink
                    .frame_complete(&frame.data[..pixels], frame.width, frame.height);
                drop(frame);
                self.sink.vdp2_draw_finished();
            }
            Vdp2Event::EraseBarrier | Vdp2Event::SwapBarrier => {}
            Vdp2Event::VramWrite8 { addr, value } => {
                self.shared.write().unwrap().vram.write_8(addr as usize, value);
            }
            Vdp2Event::VramWrite16 { addr, value } => {
                self.shared
                    .write()
                    .unwrap()
                    .vram
                    .write_16(addr as usize, value);
            }
            Vdp2Event::CramWrite8 { addr, value } => {
                let mut shared = self.shared.write().unwrap();
                shared.cram.write_8(addr as usize, value);
                if shared.regs2.vram_control.color_ram_mode <= 1 {
                    let Vdp2RenderState {
                        cram, cram_cache, ..
                    } = &mut *shared;
                    cram_cache.update(cram, addr as usize);
                }
            }
            Vdp2Event::CramWrite16 { addr, value } => {
                let mut shared = self.shared.write().unwrap();
                shared.cram.write_16(addr as usize, value);
                if shared.regs2.vram_control.color_ram_mode <= 1 {
                    let Vdp2RenderState {
                        cram, cram_cache, ..
                    } = &mut *shared;
                    cram_cache.update(cram, addr as usize);
                }
            }
            Vdp2Event::RegWrite { addr, value } => {
                let mut shared = self.shared.write().unwrap();
                let old_mode = shared.regs2.vram_control.color_ram_mode;
                shared.regs2.write(addr, value);
                let new_mode = shared.regs2.vram_control.color_ram_mode;
                // A switch into one of the 5:5:5 modes refills the cache
                if new_mode != old_mode && new_mode <= 1 {
                    shared.rebuild_cram_cache();
                }
                // Writes to the whole-dot scroll registers also reset the
                // fractional accumulator mid-frame
                match addr & 0x1FF {
                    0x092 => shared.norm_bg_states[2].frac_scroll_y = 0,
                    0x096 => shared.norm_bg_states[3].frac_scroll_y = 0,
                    _ => {}
                }
            }
            Vdp2Event::Vdp1RegWrite { addr, value } => {
                self.shared.write().unwrap().regs1.write(addr, value);
            }
            Vdp2Event::PreSaveBarrier => {}
            Vdp2Event::PostLoadSync(sync) => {
                let mut shared = self.shared.write().unwrap();
                shared.vram = sync.vram;
                shared.cram = sync.cram;
                shared.regs2 = sync.regs2;
                shared.regs1 = sync.regs1;
                shared.regs2.access_patterns_dirty = true;
                shared.rebuild_cram_cache();
            }
            Vdp2Event::Shutdown => {
                if let DeintBackend::Worker {
                    begin_tx,
                    end_rx,
                    handle,
                } = &mut self.deint
                {
                    let _ = begin_tx.send(None);
                    let _ = end_rx.recv();
                    if let Some(handle) = handle.take() {
                        let _ = handle.join();
                    }
                }
                return false;
            }
        }
        true
    }

    fn draw_line_event(&mut self, vcnt: u32) {
        {
            let mut shared = self.shared.write().unwrap();
            shared.prepare_line(vcnt);
        }

        let shared = self.shared.read().unwrap();
        if !shared.regs2.display_enable_latch {
            // Still emit the blanked row
            draw_line(&shared, &mut self.primary, &self.fbs, &self.frame, vcnt, false);
            drop(shared);
            self.shared.write().unwrap().finish_line();
            return;
        }

        let deinterlacing = shared.deinterlace && shared.regs2.interlace.is_interlaced();
        match &mut self.deint {
            DeintBackend::Worker {
                begin_tx, end_rx, ..
            } if deinterlacing => {
                // Alternate field runs in parallel with the primary field
                let _ = begin_tx.send(Some(vcnt));
                draw_line(&shared, &mut self.primary, &self.fbs, &self.frame, vcnt, false);
                let _ = end_rx.recv();
            }
            DeintBackend::Inline(alt) if deinterlacing => {
                draw_line(&shared, &mut self.primary, &self.fbs, &self.frame, vcnt, false);
                draw_line(&shared, alt, &self.fbs, &self.frame, vcnt, true);
            }
            _ => {
                draw_line(&shared, &mut self.primary, &self.fbs, &self.frame, vcnt, false);
            }
        }
        drop(shared);

        self.shared.write().unwrap().finish_line();
    }
}

fn deinterlace_worker(
    shared: Arc<RwLock<Vdp2RenderState>>,
    fbs: Arc<Mutex<SpriteFramebuffers>>,
    frame: Arc<Mutex<FrameOutput>>,
    begin_rx: Receiver<Option<u32>>,
    end_tx: Sender<()>,
) {
    profiling::register_thread!("VDP deinterlace worker");

    let mut ctx = FieldContext::new();
    while let Ok(Some(y)) = begin_rx.recv() {
        {
            let shared = shared.read().unwrap();
            draw_line(&shared, &mut ctx, &fbs, &frame, y, true);
        }
        let _ = end_tx.send(());
    }
    let _ = end_tx.send(());
}

pub enum Vdp2Backend {
    Inline(Box<Vdp2Engine>),
    Threaded {
        tx: Sender<Vdp2Event>,
        done_rx: Receiver<()>,
        handle: Option<JoinHandle<()>>,
    },
}

impl Vdp2Backend {
    pub fn new(
        options: &VdpOptions,
        fbs: Arc<Mutex<SpriteFramebuffers>>,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self, VdpInitError> {
        let engine = Box::new(Vdp2Engine::new(options, fbs, sink)?);

        if !options.threaded_vdp2 {
            return Ok(Vdp2Backend::Inline(engine));
        }

        let (tx, rx) = unbounded();
        let (done_tx, done_rx) = bounded(1);
        let handle = std::thread::Builder::new()
            .name("VDP2 render worker".into())
            .spawn(move || vdp2_worker(engine, rx, done_tx))
            .map_err(|source| VdpInitError::WorkerSpawn {
                name: "VDP2",
                source,
            })?;

        Ok(Vdp2Backend::Threaded {
            tx,
            done_rx,
            handle: Some(handle),
        })
    }

    pub fn send(&mut self, event: Vdp2Event) {
        match self {
            Vdp2Backend::Inline(engine) => {
                engine.handle_event(event);
            }
            Vdp2Backend::Threaded { tx, .. } => {
                let _ = tx.send(event);
            }
        }
    }

    /// Sends a barrier-class event and blocks until the worker acknowledges.
    pub fn send_and_wait(&mut self, event: Vdp2Event) {
        match self {
            Vdp2Backend::Inline(engine) => {
                engine.handle_event(event);
            }
            Vdp2Backend::Threaded { tx, done_rx, .. } => {
                let _ = tx.send(event);
                let _ = done_rx.recv();
            }
        }
    }
}

impl Drop for Vdp2Backend {
    fn drop(&mut self) {
        if let Vdp2Backend::Threaded { tx, handle, .. } = self {
            let _ = tx.send(Vdp2Event::Shutdown);
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
    }
}

fn vdp2_worker(mut engine: Box<Vdp2Engine>, rx: Receiver<Vdp2Event>, done_tx: Sender<()>) {
    profiling::register_thread!("VDP2 render worker");

    while let Ok(event) = rx.recv() {
        let is_barrier = matches!(
            event,
            Vdp2Event::EndFrame
                | Vdp2Event::EraseBarrier
                | Vdp2Event::SwapBarrier
                | Vdp2Event::PreSaveBarrier
                | Vdp2Event::PostLoadSync(_)
        );
        let keep_running = engine.handle_event(event);
        if is_barrier {
            let _ = done_tx.send(());
        }
        if !keep_running {
            break;
        }
    }
}
