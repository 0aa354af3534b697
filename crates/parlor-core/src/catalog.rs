//! Message catalog.
//!
//! The rest of the system treats localization as an opaque
//! `lookup(locale, key, args) -> String`. Only English ships in-tree;
//! unknown locales fall back to it and unknown keys echo the key so a
//! missing entry degrades to something a screen reader can still speak.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::ui::{Arg, Text};

static ENGLISH: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        // Shell menus
        ("play", "Play"),
        ("saved-tables", "Saved tables"),
        ("leaderboards", "Leaderboards"),
        ("my-stats", "My statistics"),
        ("options", "Options"),
        ("logout", "Log out"),
        ("back", "Back"),
        ("go-back", "Go back"),
        ("cancel", "Cancel"),
        ("goodbye", "Goodbye!"),
        ("create-table", "Create a new table"),
        ("table-listing", "{host}'s table ({count} players)"),
        ("join-as-player", "Join as player"),
        ("join-as-spectator", "Join as spectator"),
        ("table-created", "Created a {game} table."),
        ("waiting-for-players", "Waiting for players: {current} of {min}-{max}."),
        ("table-not-exists", "That table no longer exists."),
        ("table-full", "That table is full."),
        ("spectator-joined", "Now spectating {host}'s table."),
        ("user-online", "{player} is online."),
        ("user-offline", "{player} is offline."),
        ("language-option", "Language: {language}"),
        ("language-changed", "Language changed to {language}."),
        ("turn-sound-option", "Play turn sound: {status}"),
        ("clear-kept-option", "Clear kept dice on roll: {status}"),
        ("dice-keeping-style-option", "Dice keeping style: {style}"),
        ("dice-keeping-style-changed", "Dice keeping style set to {style}."),
        ("dice-keeping-style-indexes", "By position (keys 1-5)"),
        ("dice-keeping-style-values", "By face value (keys 1-6)"),
        ("option-on", "on"),
        ("option-off", "off"),
        ("no-saved-tables", "You have no saved tables."),
        ("restore-table", "Restore"),
        ("delete-saved-table", "Delete"),
        ("saved-table-deleted", "Saved table deleted."),
        ("missing-players", "Cannot restore: missing players: {players}."),
        ("game-type-not-found", "That game is not available on this server."),
        ("table-restored", "Table restored. Welcome back!"),
        // Leaderboards and stats
        ("leaderboard-rating", "Skill rating"),
        ("leaderboard-wins", "Most wins"),
        ("leaderboard-games-played", "Most games played"),
        ("leaderboard-rating-entry", "{rank}. {player}: {rating}"),
        ("leaderboard-count-entry", "{rank}. {player}: {count}"),
        ("leaderboard-empty", "No results recorded yet."),
        ("leaderboard-type-avg-points-per-turn", "Average points per turn"),
        ("leaderboard-type-best-single-turn", "Best single turn"),
        ("stats-games-played", "Games played: {count}"),
        ("stats-wins", "Wins: {count}"),
        ("stats-rating", "Rating: {rating}"),
        ("stats-no-games", "You have not finished any games yet."),
        // Lobby and standard actions
        ("start-game", "Start game"),
        ("add-bot", "Add a bot"),
        ("remove-bot", "Remove a bot"),
        ("spectate", "Spectate"),
        ("play-seat", "Play"),
        ("leave-table", "Leave table"),
        ("estimate-duration", "Estimate game duration"),
        ("actions-menu", "Actions menu"),
        ("save-table", "Save table"),
        ("whose-turn", "Whose turn is it?"),
        ("check-scores", "Check scores"),
        ("check-scores-detailed", "Check detailed scores"),
        ("predict-outcomes", "Predict outcomes"),
        ("enter-bot-name", "Enter a name for the bot:"),
        ("no-bot-names-available", "No bot names are available."),
        ("no-options-available", "No options are available."),
        ("no-actions-available", "No actions are available."),
        ("action-with-key", "{label} ({key})"),
        ("context-menu", "Actions"),
        ("status-box-closed", "Closed."),
        ("action-not-host", "Only the host can do that."),
        ("action-game-in-progress", "The game is already in progress."),
        ("action-need-more-players", "Not enough players to start."),
        ("action-need-more-humans", "At least two human players are required."),
        ("action-table-full", "The table is full."),
        ("action-no-bots", "There are no bots to remove."),
        ("action-bots-cannot", "Bots cannot do that."),
        ("action-not-playing", "The game has not started."),
        ("action-not-your-turn", "It is not your turn."),
        ("action-spectator", "Spectators cannot do that."),
        ("action-no-scores", "There are no scores yet."),
        // In-game framework messages
        ("game-starting", "The game is starting!"),
        ("game-turn-start", "It is {player}'s turn."),
        ("game-no-turn", "No one's turn right now."),
        ("game-player-skipped", "{player} was skipped."),
        ("game-round-start", "Round {round}."),
        ("game-tiebreaker-players", "Tiebreaker round between {players}!"),
        ("game-over", "Game over!"),
        ("game-final-scores", "Final scores:"),
        ("game-points", "{count} points"),
        ("game-end-congrats", "Congratulations, you did great!"),
        ("table-joined", "{player} joined the table."),
        ("table-left", "{player} left the table."),
        ("now-spectating", "{player} is now spectating."),
        ("now-playing", "{player} is now playing."),
        ("new-host", "{player} is the new host."),
        ("player-replaced-by-bot", "{player} left and was replaced by a bot."),
        ("player-took-over", "{player} took over their seat."),
        ("table-saved-destroying", "Table saved. Closing the table."),
        // Options framework
        ("game-set-target-score", "Target score: {score}"),
        ("game-enter-target-score", "Enter the target score:"),
        ("game-set-team-mode", "Team mode: {mode}"),
        ("game-select-team-mode", "Select a team mode:"),
        ("team-mode-individual", "Individual"),
        ("team-mode-grouped", "{teams} teams of {size}"),
        ("team-name-joined", "{names}'s team"),
        ("team-score-brief", "{team}: {score}"),
        ("team-score-round", "{team}: {score} total, {round} this round"),
        // Prediction
        ("predict-header", "Predicted standings:"),
        ("predict-entry", "{rank}. {player} (rating {rating})"),
        ("predict-entry-2p", "{rank}. {player} (rating {rating}, {probability}% to win)"),
        ("predict-unavailable", "Predictions are not available."),
        ("predict-need-players", "At least two human players are required."),
        // Estimation
        ("estimate-computing", "Estimating game duration, this may take a while..."),
        ("estimate-already-running", "An estimate is already running."),
        ("estimate-error", "The estimate failed."),
        (
            "estimate-result",
            "Bots finish in about {bot_time} (stddev {std_dev}). {outlier_info}Humans would take about {human_time}.",
        ),
        // Dice helpers
        ("dice-locked", "That die is locked."),
        ("dice-keeping", "Keeping {value}."),
        ("dice-rerolling", "Rerolling {value}."),
        ("dice-not-rolled", "You have not rolled yet."),
        ("dice-no-dice", "You have no dice."),
        ("dice-die-label", "Die {number}: {value}"),
        ("dice-die-kept", "Die {number}: {value} (kept)"),
        ("dice-die-locked", "Die {number}: {value} (locked)"),
        // Poker helpers
        ("poker-raise-too-small", "You must raise by at least {minimum}."),
        // Game categories and names
        ("category-dice-games", "Dice games"),
        ("category-uncategorized", "Other games"),
        ("game-name-pig", "Pig"),
        ("game-name-farkle", "Farkle"),
        ("game-name-threes", "Threes"),
        // Pig
        ("pig-roll", "Roll"),
        ("pig-bank", "Bank {points} points"),
        ("pig-rolls", "{player} rolls..."),
        ("pig-roll-result", "Rolled a {roll}, {total} this turn."),
        ("pig-bust", "{player} rolled a 1 and lost {points} points!"),
        ("pig-bank-action", "{player} banks {points} points for a total of {total}."),
        ("pig-winner", "{player} wins!"),
        ("pig-need-more-points", "You need more points to bank."),
        ("pig-set-min-bank", "Minimum bank: {points}"),
        ("pig-enter-min-bank", "Enter the minimum points required to bank:"),
        ("pig-set-dice-sides", "Die sides: {sides}"),
        ("pig-enter-dice-sides", "Enter the number of sides on the die:"),
        // Farkle
        ("farkle-roll", "Roll {count} dice"),
        ("farkle-bank", "Bank {points} points"),
        ("farkle-check-turn", "Check turn score"),
        ("farkle-rolls", "{player} rolls {count} dice..."),
        ("farkle-roll-result", "Rolled: {dice}."),
        ("farkle-busted", "Farkle! {player} loses {points} points."),
        ("farkle-hot-dice", "Hot dice! All six dice score, roll again."),
        ("farkle-take-combo", "Take {combo} for {points}"),
        ("farkle-you-take-combo", "You take {combo} for {points}."),
        ("farkle-takes-combo", "{player} takes {combo} for {points}."),
        ("farkle-banks", "{player} banks {points} for a total of {total}."),
        ("farkle-must-take-combo", "You must take a scoring combination first."),
        ("farkle-cannot-bank", "You cannot bank right now."),
        ("farkle-turn-score", "{player} has {points} points this turn."),
        ("farkle-winner", "{player} wins with {score} points!"),
        ("farkle-winners-tie", "Tiebreaker between {players}!"),
        ("farkle-set-target-score", "Target score: {score}"),
        ("farkle-enter-target-score", "Enter the target score:"),
        // Threes
        ("threes-roll", "Roll"),
        ("threes-bank", "Bank and end turn"),
        ("threes-check-hand", "Check hand"),
        ("threes-must-keep", "You must keep at least one die."),
        ("threes-must-bank", "Only one die left, you must bank."),
        ("threes-roll-first", "Roll first."),
        ("threes-keep-all-first", "Keep or lock every die before banking."),
        ("threes-last-die", "You cannot toggle your last die."),
        ("threes-no-dice-yet", "You have not rolled yet."),
        ("threes-you-rolled", "You rolled: {dice}."),
        ("threes-player-rolled", "{player} rolled: {dice}."),
        ("threes-your-dice", "Your dice: {dice}."),
        ("threes-you-scored", "You scored {score}."),
        ("threes-scored", "{player} scored {score}."),
        ("threes-you-shot-moon", "Five sixes! You shot the moon for -30!"),
        ("threes-shot-moon", "{player} shot the moon for -30!"),
        ("threes-round-start", "Round {round} of {total}."),
        ("threes-round-scores", "Round {round} scores: {scores}."),
        ("threes-winner", "{player} wins with {score}!"),
        ("threes-tie", "{players} tie with {score}!"),
        ("threes-set-rounds", "Rounds: {rounds}"),
        ("threes-enter-rounds", "Enter the number of rounds:"),
    ])
});

/// Look up `key` for `locale`, interpolating `{name}` placeholders from
/// `args`. Unknown keys echo the key itself.
pub fn lookup(locale: &str, key: &str, args: &[(String, Arg)]) -> String {
    // Only English ships in-tree; other locales fall back to it.
    let _ = locale;
    let Some(template) = ENGLISH.get(key) else {
        return key.to_string();
    };
    let mut rendered = (*template).to_string();
    for (name, arg) in args {
        let value = match arg {
            Arg::Str(s) => s.clone(),
            Arg::Int(n) => n.to_string(),
            Arg::Key(k) => lookup(locale, k, &[]),
            Arg::Nested(text) => render(locale, text),
        };
        rendered = rendered.replace(&format!("{{{name}}}"), &value);
    }
    rendered
}

/// Render a [`Text`] for a locale.
pub fn render(locale: &str, text: &Text) -> String {
    match text {
        Text::Raw(raw) => raw.clone(),
        Text::Localized { key, args } => lookup(locale, key, args),
    }
}

/// Locales selectable from the language menu, as (code, native name).
pub const AVAILABLE_LOCALES: &[(&str, &str)] = &[("en", "English")];

/// Join names with a locale-appropriate "and".
pub fn format_list_and(locale: &str, names: &[String]) -> String {
    let _ = locale;
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{first} and {second}"),
        [head @ .., last] => format!("{} and {last}", head.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_interpolates_args() {
        let args = vec![("player".to_string(), Arg::from("Alice"))];
        assert_eq!(lookup("en", "user-online", &args), "Alice is online.");
    }

    #[test]
    fn unknown_key_echoes_key() {
        assert_eq!(lookup("en", "definitely-missing", &[]), "definitely-missing");
    }

    #[test]
    fn key_args_render_nested() {
        let args = vec![("status".to_string(), Arg::Key("option-on".to_string()))];
        assert_eq!(lookup("en", "turn-sound-option", &args), "Play turn sound: on");
    }

    #[test]
    fn unknown_locale_falls_back_to_english() {
        assert_eq!(lookup("fr", "play", &[]), "Play");
    }

    #[test]
    fn list_formatting() {
        let names = vec!["Alice".to_string(), "Bob".to_string(), "Carol".to_string()];
        assert_eq!(format_list_and("en", &names), "Alice, Bob and Carol");
        assert_eq!(format_list_and("en", &names[..2]), "Alice and Bob");
        assert_eq!(format_list_and("en", &names[..1]), "Alice");
    }
}
