use console::{Emoji, style};

pub static MOON: Emoji<'_, '_> = Emoji("🌙 ", "");
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

pub fn print_banner() {
    let lines: &[&str] = &[
        "                  _                       ",
        " _ __   ___   ___| |_ _   _ _ __ _ __   ___ ",
        "| '_ \\ / _ \\ / __| __| | | | '__| '_ \\ / _ \\",
        "| | | | (_) | (__| |_| |_| | |  | | | |  __/",
        "|_| |_|\\___/ \\___|\\__|\\__,_|_|  |_| |_|\\___|",
    ];

    println!();
    for line in lines {
        println!("{}", style(line).magenta().bold());
    }
    println!(
        "{}\n",
        style("An agenda that runs while you sleep.").cyan()
    );
}

pub fn print_goodbye() {
    println!(
        "\n{} {}",
        SPARKLE,
        style("nocturne is done for now. Sleep well.").bold().cyan()
    );
}

/// One titled block of commands in the help screen.
pub struct GuideSection {
    title: String,
    entries: Vec<(String, String)>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.entries.push((name.to_string(), description.to_string()));
        self
    }

    pub fn print(self) {
        println!(" {}", style(self.title).bold().underlined());
        for (name, description) in &self.entries {
            println!("   {:<12} {}", style(name).green(), description);
        }
        println!();
    }
}
