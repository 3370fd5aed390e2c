use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

use fishreel::{
    quiz::{self, SegmentKind},
    FishDb, QuizJob, RenderConfig,
};

#[derive(Parser, Debug)]
#[command(name = "fishreel", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compose a single quiz still as a PNG.
    Frame(FrameArgs),
    /// Render the full quiz MP4 (requires `ffmpeg` on PATH).
    Render(RenderArgs),
}

#[derive(Parser, Debug)]
struct SelectArgs {
    /// Fish database JSON (name -> image URL).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Fish to feature; default: random pick from the database.
    #[arg(long)]
    fish: Option<String>,

    /// Local subject image, used instead of the database URL.
    #[arg(long)]
    fish_image: Option<PathBuf>,

    /// Background photo; solid black when omitted or unreadable.
    #[arg(long)]
    background: Option<PathBuf>,

    /// Directory for cached subject downloads.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Render configuration JSON; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Which still to compose.
    #[arg(long, value_enum, default_value_t = SegmentChoice::Guess)]
    segment: SegmentChoice,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    #[command(flatten)]
    select: SelectArgs,

    /// Music track to mux into a second output next to the silent one.
    #[arg(long)]
    music: Option<PathBuf>,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SegmentChoice {
    Guess,
    Lose,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Frame(args) => cmd_frame(args),
        Command::Render(args) => cmd_render(args),
    }
}

fn read_config(path: Option<&Path>) -> anyhow::Result<RenderConfig> {
    let Some(path) = path else {
        return Ok(RenderConfig::default());
    };
    let f = File::open(path).with_context(|| format!("open config '{}'", path.display()))?;
    let cfg: RenderConfig =
        serde_json::from_reader(BufReader::new(f)).with_context(|| "parse config JSON")?;
    cfg.validate()?;
    Ok(cfg)
}

fn build_job(select: &SelectArgs, out: &Path) -> anyhow::Result<QuizJob> {
    let db = select
        .db
        .as_deref()
        .map(FishDb::load)
        .transpose()
        .context("load fish database")?;

    let (fish_name, fish_url) = match (&select.fish, &db) {
        (Some(name), Some(db)) => (name.clone(), db.get(name).map(str::to_string)),
        (Some(name), None) => (name.clone(), None),
        (None, Some(db)) => {
            let (name, url) = db.pick_random()?;
            (name.to_string(), Some(url.to_string()))
        }
        (None, None) => anyhow::bail!("either --fish or --db is required"),
    };

    let mut job = QuizJob::new(fish_name, out);
    job.config = read_config(select.config.as_deref())?;
    job.fish_url = fish_url;
    job.fish_path = select.fish_image.clone();
    job.background_path = select.background.clone();
    job.cache_dir = select.cache_dir.clone();
    Ok(job)
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let job = build_job(&args.select, Path::new("unused.mp4"))?;
    let font = fishreel::load_font_with_fallback(&job.config.caption)?;
    let background = quiz::load_background(job.background_path.as_deref());

    let kind = match args.segment {
        SegmentChoice::Guess => SegmentKind::Guess,
        SegmentChoice::Lose => SegmentKind::Lose,
    };

    // Only the reveal still needs the subject image; an unobtainable one
    // degrades to the placeholder card, same as the full render.
    let subject = match kind {
        SegmentKind::Guess => None,
        SegmentKind::Lose => Some(quiz::resolve_subject(&job, &font)),
    };

    let frame = quiz::compose_segment(&job, kind, &font, background.as_ref(), subject.as_ref());

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        frame.as_raw(),
        frame.width(),
        frame.height(),
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut job = build_job(&args.select, &args.out)?;
    job.music_path = args.music;

    let final_path = quiz::generate(&job)?;
    eprintln!("wrote {}", final_path.display());
    Ok(())
}
