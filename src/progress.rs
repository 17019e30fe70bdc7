use std::io::{self, Write};

/// Progress displayer for per-sample batch loops
pub struct BatchProgress {
    total: usize,
    current: usize,
    last_width: usize,
}

impl BatchProgress {
    /// Create a new batch progress displayer
    pub fn new(total: usize) -> Self {
        Self {
            total,
            current: 0,
            last_width: 0,
        }
    }

    /// Update progress with the name of the item being processed
    pub fn update(&mut self, current: usize, name: &str) -> io::Result<()> {
        self.current = current;
        let percentage = if self.total > 0 {
            (current * 100) / self.total
        } else {
            0
        };

        let line = format!(
            "[Progressing] {}/{} ({}%) {}",
            self.current, self.total, percentage, name
        );
        // Pad with spaces so a shorter line fully overwrites the previous one
        let pad = self.last_width.saturating_sub(line.len());
        print!("\r{}{}", line, " ".repeat(pad));
        io::stdout().flush()?;
        self.last_width = line.len();

        Ok(())
    }

    /// Finish progress display
    pub fn finish(&mut self) -> io::Result<()> {
        self.current = self.total;
        let line = format!("[Progressing] {}/{} (100%)", self.total, self.total);
        let pad = self.last_width.saturating_sub(line.len());
        println!("\r{}{}", line, " ".repeat(pad));
        io::stdout().flush()?;
        Ok(())
    }
}

/// Format time as "xx h xx m xx.xxx s" format
pub fn format_time_used(elapsed: std::time::Duration) -> String {
    let total_secs = elapsed.as_secs_f64();
    let hours = (total_secs / 3600.0) as u64;
    let minutes = ((total_secs % 3600.0) / 60.0) as u64;
    let seconds = total_secs % 60.0;

    if hours > 0 {
        format!("[Time used] {:02} h {:02} m {:05.3} s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("[Time used] {:02} m {:05.3} s", minutes, seconds)
    } else {
        format!("[Time used] {:05.3} s", seconds)
    }
}
