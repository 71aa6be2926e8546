use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_banner() {
    let lines: &[&str] = &[
        "          _          __        __ ",
        " _    __ (_)____ ___ / /  ___  / /_",
        "| |/|/ // // __// -_) _ \\/ _ \\/ __/",
        "|__,__//_//_/   \\__/_.__/\\___/\\__/ ",
    ];
    println!();
    for line in lines {
        println!("{}", style(line).cyan().bold());
    }
    println!(
        "{}",
        style("News bots that post while you sleep.").cyan().dim()
    );
    println!();
}

/// A titled block of command/description rows used by the CLI help and
/// status screens.
pub struct GuideSection {
    title: String,
    rows: Vec<(String, String)>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn command(mut self, cmd: &str, desc: &str) -> Self {
        self.rows.push((cmd.to_string(), desc.to_string()));
        self
    }

    pub fn entry(mut self, label: &str, value: &str) -> Self {
        self.rows.push((label.to_string(), value.to_string()));
        self
    }

    pub fn print(self) {
        println!("\n {}", style(self.title).bold().underlined());
        let width = self.rows.iter().map(|(c, _)| c.len()).max().unwrap_or(0);
        for (cmd, desc) in self.rows {
            println!(
                "   {}  {}",
                style(format!("{:width$}", cmd, width = width)).green(),
                desc
            );
        }
    }
}

pub fn print_goodbye() {
    println!(
        "\n{} {}",
        SPARKLE,
        style("wirebot done. See you next run!").bold().cyan()
    );
}
