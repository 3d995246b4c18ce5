use anyhow::Context;
use nebula::catalog::FolderCatalog;
use nebula::config;
use nebula::model::{Track, TrackId};
use nebula::queue::QueueStep;
use nebula::store::StateStore;
use nebula::MusicCore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Default)]
struct CliArgs {
    libraries: Vec<PathBuf>,
    command: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    nebula::logging::init();
    let args = parse_args(std::env::args().skip(1).collect())?;

    config::ensure_config_dir()?;
    let mut settings = config::load_settings()?;
    let mut folders_changed = false;
    for folder in &args.libraries {
        let normalized = config::normalize_path(folder);
        if !settings.library_folders.contains(&normalized) {
            settings.library_folders.push(normalized);
            folders_changed = true;
        }
    }
    if folders_changed {
        config::save_settings(&settings)?;
    }

    let source = Arc::new(FolderCatalog::new(settings.library_folders.clone()));
    let store = StateStore::open(config::state_path()?);
    let mut core = MusicCore::open(source, store, &settings);

    let result = run_command(&mut core, &args.command);
    core.close();
    result
}

fn run_command(core: &mut MusicCore, command: &[String]) -> anyhow::Result<()> {
    let name = command.first().map(String::as_str).unwrap_or("status");
    let arg = command.get(1).map(String::as_str);

    match name {
        "scan" => {
            let count = core.refresh_library()?;
            println!("{count} tracks");
        }
        "status" => print_status(core),
        "list" => {
            for track in core.tracks_sorted() {
                print_track(&track);
            }
        }
        "play" => {
            let start: usize = match arg {
                Some(raw) => raw.parse().context("play expects a list position")?,
                None => 0,
            };
            let ids: Vec<TrackId> = core.tracks_sorted().iter().map(|t| t.id).collect();
            let step = core.start_playback(&ids, start);
            report_step(core, step);
        }
        "shuffle-all" => {
            let ids: Vec<TrackId> = core.all_tracks().iter().map(|t| t.id).collect();
            let step = core.shuffle_play(&ids);
            report_step(core, step);
        }
        "next" => {
            let step = core.next();
            report_step(core, step);
        }
        "prev" => {
            let step = core.previous();
            report_step(core, step);
        }
        "shuffle" => {
            let step = core.toggle_shuffle();
            report_step(core, step);
            println!("mode: {}", core.repeat_mode().label());
        }
        "repeat" => println!("mode: {}", core.toggle_repeat().label()),
        "seek" => {
            let ms: i64 = required(arg, "seek expects milliseconds")?
                .parse()
                .context("seek expects milliseconds")?;
            core.seek_to(ms)?;
        }
        "fav" => {
            let id = track_id(arg)?;
            if core.add_favorite(id)? {
                println!("added {id} to favorites");
            }
        }
        "unfav" => {
            let id = track_id(arg)?;
            if core.remove_favorite(id) {
                println!("removed {id} from favorites");
            }
        }
        "favorites" => {
            for track in core.favorites() {
                print_track(&track);
            }
        }
        "recent" => {
            for track in core.recent_tracks() {
                print_track(&track);
            }
        }
        "albums" | "artists" | "genres" => {
            let groups = match name {
                "albums" => core.albums(),
                "artists" => core.artists(),
                _ => core.genres(),
            };
            for group in groups {
                println!("{} ({} tracks)", group.name, group.track_ids.len());
            }
        }
        "search" => {
            let query = command[1..].join(" ");
            for track in core.search(&query) {
                print_track(&track);
            }
        }
        "clear" => core.clear_playback_state(),
        other => anyhow::bail!("unknown command {other}"),
    }
    Ok(())
}

fn report_step(core: &MusicCore, step: QueueStep) {
    match step {
        QueueStep::Moved { position, track_id } => {
            let title = core
                .track(track_id)
                .map(|t| t.title.clone())
                .unwrap_or_else(|| track_id.to_string());
            println!("[{}] {title}", position + 1);
        }
        QueueStep::NoCurrentTrack => println!("nothing queued"),
    }
}

fn print_status(core: &MusicCore) {
    println!("{}", core.status());
    let queue = core.queue_snapshot();
    match core.current_track() {
        Some(track) => println!(
            "now: {} - {} [{}/{}] {} at {} ms",
            track.artist,
            track.title,
            queue.position + 1,
            queue.current_order.len(),
            queue.repeat_mode.label(),
            queue.last_seek_position_ms
        ),
        None => match core.last_song_details() {
            Some(details) => println!("last played: {} - {}", details.artist, details.title),
            None => println!("nothing queued"),
        },
    }
}

fn print_track(track: &Track) {
    let secs = track.duration_ms / 1000;
    println!(
        "{:>20}  {} - {} ({}:{:02})",
        track.id.0,
        track.artist,
        track.title,
        secs / 60,
        secs % 60
    );
}

fn required<'a>(value: Option<&'a str>, message: &str) -> anyhow::Result<&'a str> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value.trim()),
        _ => anyhow::bail!("{message}"),
    }
}

fn track_id(value: Option<&str>) -> anyhow::Result<TrackId> {
    let raw = required(value, "expected a track id")?;
    let id: i64 = raw.parse().with_context(|| format!("invalid track id {raw}"))?;
    Ok(TrackId(id))
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--library" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--library requires a folder");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--library cannot be empty");
                }
                out.libraries.push(PathBuf::from(value.trim()));
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') && out.command.is_empty() => {
                anyhow::bail!("unknown argument {other}")
            }
            other => out.command.push(other.to_string()),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("nebula [--library DIR]... [COMMAND]");
    println!("  --library DIR     Add a music folder (remembered)");
    println!();
    println!("  status            Current track and queue (default)");
    println!("  scan              Rescan the library");
    println!("  list              All songs in the saved sort order");
    println!("  play [N]          Play all songs starting at position N");
    println!("  shuffle-all       Shuffle all songs");
    println!("  next | prev       Skip forward or back");
    println!("  shuffle | repeat  Toggle shuffle or cycle repeat mode");
    println!("  seek MS           Remember a seek position");
    println!("  fav ID | unfav ID Mark or unmark a favorite");
    println!("  favorites         List favorites");
    println!("  recent            Recently played");
    println!("  albums | artists | genres");
    println!("  search TEXT       Search title, artist and album");
    println!("  clear             Forget the saved queue");
}
