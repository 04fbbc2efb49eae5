//! Filter-graph expressions handed to ffmpeg.
//!
//! Everything here is pure string and number work so frame timing can be
//! verified without a transcoder.

/// Fit inside `width`x`height`, letterboxing the rest.
pub fn scale_pad(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        w = width,
        h = height
    )
}

/// Normalizes a clip to the canonical frame size and rate.
pub fn clip_filter(width: u32, height: u32, fps: u32) -> String {
    format!("{},setsar=1,fps={}", scale_pad(width, height), fps)
}

/// How many extra passes `-stream_loop` needs so a short clip covers `target`.
pub fn loop_count(target_sec: f64, source_sec: f64) -> u32 {
    ((target_sec / source_sec).ceil() as u32).saturating_add(2)
}

/// Number of frames covering `duration_sec` at `fps`, at least one.
pub fn frame_count(duration_sec: f64, fps: u32) -> u64 {
    ((duration_sec * fps as f64).round() as u64).max(1)
}

/// Slow zoom on a still, reaching `zoom_factor` on the final frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomPan {
    pub zoom_factor: f64,
    pub fps: u32,
    pub duration_sec: f64,
    pub width: u32,
    pub height: u32,
}

impl ZoomPan {
    pub fn total_frames(&self) -> u64 {
        frame_count(self.duration_sec, self.fps)
    }

    /// Per-frame zoom increment.
    pub fn step(&self) -> f64 {
        (self.zoom_factor - 1.0) / self.total_frames() as f64
    }

    /// Increment as written into the filter: rounded up past the nine
    /// decimals it carries, so `min(zoom+step, factor)` hits the factor by
    /// the last frame.
    pub fn emitted_step(&self) -> f64 {
        ((self.step() * 1e9).ceil() + 1.0) / 1e9
    }

    pub fn filter(&self) -> String {
        let (w, h) = (self.width, self.height);
        format!(
            "scale={w2}:{h2}:force_original_aspect_ratio=increase,crop={w2}:{h2},\
             zoompan=z='min(zoom+{step:.9},{zoom})':x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':\
             d={frames}:fps={fps}:s={w}x{h},setsar=1",
            w2 = w * 2,
            h2 = h * 2,
            step = self.emitted_step(),
            zoom = self.zoom_factor,
            frames = self.total_frames(),
            fps = self.fps,
        )
    }
}

/// Escapes text for a single-quoted `drawtext` value.
pub fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "'\\''")
        .replace(':', "\\:")
        .replace(',', "\\,")
        .replace('%', "\\%")
}

/// Scales an evidence still to its overlay box and burns the credit bottom-right.
pub fn credit_filter(credit: &str, width: u32, height: u32) -> String {
    format!(
        "{},drawtext=text='{}':fontcolor=white:fontsize=18:box=1:boxcolor=black@0.6:boxborderw=5:x=w-tw-10:y=h-th-10",
        scale_pad(width, height),
        escape_drawtext(credit)
    )
}

/// Time window of one evidence overlay: slide in, hold, slide out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayWindow {
    pub start: f64,
    pub hold: f64,
    pub anim: f64,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub box_width: u32,
    pub box_height: u32,
}

impl OverlayWindow {
    pub fn slide_in_end(&self) -> f64 {
        self.start + self.anim
    }

    pub fn slide_out_start(&self) -> f64 {
        self.start + self.anim + self.hold
    }

    pub fn end(&self) -> f64 {
        self.start + self.hold + 2.0 * self.anim
    }

    /// Every time the overlay expressions reference, in order.
    pub fn keyframes(&self) -> [f64; 4] {
        [self.start, self.slide_in_end(), self.slide_out_start(), self.end()]
    }

    fn center_x(&self) -> u32 {
        self.canvas_width.saturating_sub(self.box_width) / 2
    }

    fn center_y(&self) -> u32 {
        self.canvas_height.saturating_sub(self.box_height) / 2
    }

    /// Horizontal position: right edge to centre, hold, back to the right edge.
    pub fn x_expr(&self) -> String {
        let w = self.canvas_width;
        let c = self.center_x();
        format!(
            "if(lt(t,{sin:.3}),{w}+({c}-{w})*(t-{s:.3})/{a:.3},\
             if(lt(t,{sout:.3}),{c},\
             if(lt(t,{e:.3}),{c}+({w}-{c})*(t-{sout:.3})/{a:.3},{w})))",
            s = self.start,
            sin = self.slide_in_end(),
            sout = self.slide_out_start(),
            e = self.end(),
            a = self.anim,
        )
    }

    pub fn enable_expr(&self) -> String {
        format!("between(t,{:.3},{:.3})", self.start, self.end())
    }

    /// Additive brightness offset: `dim - 1` inside the window, zero outside.
    pub fn brightness_expr(&self, dim: f64) -> String {
        format!("if({},{:.3},0)", self.enable_expr(), dim - 1.0)
    }

    /// Graph over input 0 (background track) and input 1 (evidence still).
    pub fn filter_complex(&self, dim: f64) -> String {
        let (bw, bh) = (self.box_width, self.box_height);
        format!(
            "[1:v]scale={iw}:{ih}:force_original_aspect_ratio=decrease,\
             pad={bw}:{bh}:(ow-iw)/2:(oh-ih)/2:black[evidence];\
             [0:v]eq=brightness='{bright}':eval=frame[bg];\
             [bg][evidence]overlay=x='{x}':y={y}:enable='{en}'[out]",
            iw = bw.saturating_sub(10),
            ih = bh.saturating_sub(10),
            bright = self.brightness_expr(dim),
            x = self.x_expr(),
            y = self.center_y(),
            en = self.enable_expr(),
        )
    }
}

/// Narration on input 0 plus sound effects on inputs 1.., each delayed to its
/// scene start. Returns `None` when there are no effects to mix.
pub fn sfx_mix_filter(delays_ms: &[u64]) -> Option<String> {
    if delays_ms.is_empty() {
        return None;
    }
    let mut parts: Vec<String> = delays_ms
        .iter()
        .enumerate()
        .map(|(i, ms)| format!("[{n}:a]adelay={ms}|{ms}[sfx{n}]", n = i + 1, ms = ms))
        .collect();
    let labels: String = std::iter::once("[0:a]".to_string())
        .chain((1..=delays_ms.len()).map(|n| format!("[sfx{}]", n)))
        .collect();
    parts.push(format!(
        "{}amix=inputs={}:duration=first:normalize=0[aout]",
        labels,
        delays_ms.len() + 1
    ));
    Some(parts.join(";"))
}

/// Volume plus fade in/out for a prepared sound effect of `duration_sec`.
pub fn sfx_filter(volume: f64, fade_in: f64, fade_out: f64, duration_sec: f64) -> String {
    format!(
        "volume={:.2},afade=t=in:st=0:d={:.2},afade=t=out:st={:.3}:d={:.2}",
        volume,
        fade_in,
        (duration_sec - fade_out).max(0.0),
        fade_out
    )
}
