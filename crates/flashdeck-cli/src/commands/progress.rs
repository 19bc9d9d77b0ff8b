use clap::Subcommand;
use flashdeck_core::progression::{threshold, UNLOCK_TABLE};
use flashdeck_core::{ProgressionEngine, Settings, XpContext};
use serde_json::json;

use super::CliResult;

#[derive(Subcommand)]
pub enum ProgressAction {
    /// Print level, XP and unlocked features as JSON
    Show,
    /// Award XP, applying the danger-flag multipliers from the settings
    AddXp {
        /// Base points before multipliers
        amount: f64,
        /// Count the award as video XP (strict lock bonus applies)
        #[arg(long)]
        video: bool,
    },
    /// Print the unlock table
    Unlocks,
    /// Reset to level 1 with no XP
    Reset,
}

fn show(progression: &ProgressionEngine) -> serde_json::Value {
    let p = progression.progress();
    json!({
        "level": p.level,
        "xp": p.xp,
        "xp_needed": progression.xp_needed(),
        "unlocked": p.unlocked,
    })
}

pub fn run(action: ProgressAction) -> CliResult {
    match action {
        ProgressAction::Show => {
            let settings = Settings::load()?;
            let progression = ProgressionEngine::from_settings(&settings.player);
            println!("{}", serde_json::to_string_pretty(&show(&progression))?);
        }
        ProgressAction::AddXp { amount, video } => {
            if !amount.is_finite() || amount <= 0.0 {
                return Err(format!("XP amount must be positive, got {amount}").into());
            }
            let mut settings = Settings::load()?;
            let mut progression = ProgressionEngine::from_settings(&settings.player);
            let ctx = if video {
                XpContext::Video
            } else {
                XpContext::General
            };
            let gain = progression.add_xp(amount, ctx, &settings);
            settings.player.level = progression.level();
            settings.player.xp = progression.xp();
            settings.save()?;

            if gain.leveled_up() {
                eprintln!("Level up: {} -> {}", gain.from_level, gain.to_level);
            }
            for feature in &gain.unlocked {
                eprintln!("Unlocked: {feature}");
            }
            println!("{}", serde_json::to_string_pretty(&show(&progression))?);
        }
        ProgressAction::Unlocks => {
            for (level, feature) in UNLOCK_TABLE.iter() {
                println!("{level:>3}  {feature}  ({} XP to leave)", threshold(*level));
            }
        }
        ProgressAction::Reset => {
            let mut settings = Settings::load()?;
            settings.player.level = 1;
            settings.player.xp = 0.0;
            settings.save()?;
            println!("progress reset");
        }
    }
    Ok(())
}
