use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use dialoguer::{Confirm, Input};
use indicatif::{ProgressBar, ProgressStyle};
use photo_story::analyzer::{AnalysisCursor, CursorStatus, StoryBrief};
use photo_story::cli::{Cli, Commands};
use photo_story::common::{NarrativePlan, Storyboard};
use photo_story::config::Config;
use photo_story::dispatch::{CallDispatcher, SelfCheck};
use photo_story::error::PhotoStoryError;
use photo_story::events::{EventSink, ProgressEvent};
use photo_story::keys::KeyPool;
use photo_story::remote::GeminiBackend;
use photo_story::storyboard::{self, Models, StoryboardService};
use photo_story::scanner;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;
use tracing_subscriber::EnvFilter;

type Service = StoryboardService<GeminiBackend>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut config = Config::load()?;

    match cli.command {
        Commands::Plan { concept, output } => {
            println!("📝 photo-story - 構成案\n");
            let mut service = build_service(&config, None, cli.verbose)?;
            let result = service.draft_plan(&concept).await;
            persist_cooldowns(&mut config, service.dispatcher().pool());
            let plan = result?;

            print_plan(&plan);
            if let Some(output) = output {
                std::fs::write(&output, serde_json::to_string_pretty(&plan)?)?;
                println!("\n✔ 構成案を保存: {}", output.display());
            }
        }

        Commands::Run { folder, concept, plan, output, no_retry } => {
            println!("📖 photo-story - ストーリーボード作成\n");

            // 1. 画像読み込み
            println!("[1/4] 写真を読み込み中...");
            let images = scanner::load_folder(&folder, config.max_image_size)?;
            println!("✔ {}枚の写真を検出\n", images.len());

            let plan = match plan {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("構成案を読めません: {}", path.display()))?;
                    Some(serde_json::from_str::<NarrativePlan>(&content)?)
                }
                None => None,
            };
            let output = output.unwrap_or_else(|| folder.join("storyboard.json"));

            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            let mut service = build_service(&config, Some(pb.clone()), cli.verbose)?;

            let brief = StoryBrief::new(concept).with_plan(plan);
            let result = run_storyboard(&mut service, brief, images, &output, &pb, no_retry).await;
            pb.finish_and_clear();
            persist_cooldowns(&mut config, service.dispatcher().pool());
            let board = result?;

            println!("✔ ストーリーボードを保存: {}", output.display());
            print_slides(&board);
            println!("\n✅ 完了");
        }

        Commands::Edit { input, instruction } => {
            let mut board = storyboard::load_storyboard(&input)?;
            let mut service = build_service(&config, None, cli.verbose)?;
            let result = edit_loop(&mut service, &mut board, &input, instruction).await;
            persist_cooldowns(&mut config, service.dispatcher().pool());
            result?;
        }

        Commands::Illustrate { input, output_dir } => {
            println!("🎨 photo-story - 画像生成\n");
            let mut board = storyboard::load_storyboard(&input)?;
            let output_dir = output_dir.unwrap_or_else(|| base_dir(&input));
            let mut service = build_service(&config, None, cli.verbose)?;
            let result = illustrate_missing(&mut service, &mut board, &output_dir).await;
            storyboard::save_storyboard(&input, &board)?;
            persist_cooldowns(&mut config, service.dispatcher().pool());
            let generated = result?;
            println!("\n✅ {}枚の画像を生成しました", generated);
        }

        Commands::Animate { input, slide, output } => {
            println!("🎬 photo-story - 動画生成\n");
            let board = storyboard::load_storyboard(&input)?;
            let index = slide
                .checked_sub(1)
                .filter(|i| *i < board.slides.len())
                .ok_or_else(|| {
                    PhotoStoryError::InvalidState(format!(
                        "スライド番号は1〜{}で指定してください",
                        board.slides.len()
                    ))
                })?;
            let target = &board.slides[index];
            let reference = target
                .image_id
                .as_deref()
                .and_then(|id| board.find_image(id))
                .map(|img| {
                    let mut img = img.clone();
                    if img.data.is_empty() {
                        img.data = std::fs::read(base_dir(&input).join(&img.file_name)).unwrap_or_default();
                    }
                    img
                });

            let mut service = build_service(&config, None, cli.verbose)?;
            println!("- 生成中（完了まで数分かかることがあります）...");
            let result = service.animate(target, reference.as_ref()).await;
            persist_cooldowns(&mut config, service.dispatcher().pool());
            let video = result?;

            if let Some(media) = video.media {
                let output = output.unwrap_or_else(|| base_dir(&input).join(format!("slide-{}.mp4", slide)));
                std::fs::write(&output, media.data)?;
                println!("✔ 動画を保存: {}", output.display());
            } else if let Some(uri) = video.uri {
                println!("✔ 動画URI: {}", uri);
            }
        }

        Commands::Keys { check, reset } => {
            if reset {
                config.clear_cooldowns();
                config.save()?;
                println!("✔ 保存済みのクールダウンを消去しました");
            }

            let snapshot = if check {
                let mut service = build_service(&config, None, cli.verbose)?;
                let model = service.models().text.clone();
                let result = service.dispatcher_mut().check_all_keys(&model).await;
                persist_cooldowns(&mut config, service.dispatcher().pool());
                result?
            } else {
                config.build_pool(Utc::now()).snapshot()
            };

            if snapshot.is_empty() {
                println!("APIキーが設定されていません");
            }
            for key in snapshot {
                println!("  {}", key);
            }
        }

        Commands::Config { add_key, remove_key, pin, unpin, model, show } => {
            let mut changed = false;

            if let Some(key) = add_key {
                if config.add_api_key(&key) {
                    println!("✔ APIキーを追加しました");
                    changed = true;
                } else {
                    println!("APIキーは登録済みです");
                }
            }

            if let Some(selector) = remove_key {
                let removed = config.remove_api_key(&selector)?;
                println!("✔ APIキーを削除しました: {}", photo_story::keys::mask_key(&removed));
                changed = true;
            }

            if let Some(selector) = pin {
                let pinned = config.pin_key(&selector)?;
                println!("✔ APIキーを固定しました: {}", photo_story::keys::mask_key(&pinned));
                changed = true;
            }

            if unpin {
                config.unpin_key();
                println!("✔ 固定を解除しました");
                changed = true;
            }

            if let Some(model) = model {
                config.text_model = model;
                changed = true;
            }

            if changed {
                config.save()?;
            }

            if show {
                println!("設定:");
                println!("  エンドポイント: {}", config.endpoint);
                println!("  テキストモデル: {}", config.text_model);
                println!("  画像モデル: {}", config.image_model);
                println!("  動画モデル: {}", config.video_model);
                println!("  最大画像サイズ: {}px", config.max_image_size);
                println!("  APIキー: {}件", config.api_key_values().len());
                for key in config.build_pool(Utc::now()).snapshot() {
                    println!("    {}", key);
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "photo_story=debug,photo_story_common=debug"
        } else {
            "warn"
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_service(config: &Config, pb: Option<ProgressBar>, verbose: bool) -> anyhow::Result<Service> {
    let pool = config.build_pool(Utc::now());
    if pool.is_empty() {
        return Err(PhotoStoryError::NoApiKeys.into());
    }

    let backend = GeminiBackend::new(config.endpoint.clone(), config.timeout(), config.poll_settings())?;
    let (events, rx) = EventSink::channel();
    tokio::spawn(print_events(rx, pb, verbose));

    let dispatcher = CallDispatcher::new(backend, pool).with_events(events);
    Ok(StoryboardService::new(dispatcher, Models::from_config(config)))
}

/// 進捗イベントを表示する
async fn print_events(mut rx: UnboundedReceiver<ProgressEvent>, pb: Option<ProgressBar>, verbose: bool) {
    while let Some(event) = rx.recv().await {
        // 失敗は tracing の warn でも出るので、通常は案内だけ表示する
        let show = verbose || matches!(event, ProgressEvent::Info { .. });
        match &pb {
            Some(pb) => {
                if let ProgressEvent::Info { key: None, message } = &event {
                    pb.set_message(message.clone());
                } else if show {
                    pb.println(format!("  {}", event));
                }
            }
            None if show => eprintln!("  {}", event),
            None => {}
        }
    }
}

fn persist_cooldowns(config: &mut Config, pool: &KeyPool) {
    config.remember_cooldowns(pool, Utc::now());
    if let Err(e) = config.save() {
        warn!(error = %e, "キーの状態を保存できませんでした");
    }
}

async fn run_storyboard(
    service: &mut Service,
    brief: StoryBrief,
    images: Vec<photo_story::common::UploadedImage>,
    output: &Path,
    pb: &ProgressBar,
    no_retry: bool,
) -> anyhow::Result<Storyboard> {
    // 2. 疎通確認（設定誤りだけはここで止める）
    println!("[2/4] 疎通確認中...");
    match service.self_check().await? {
        SelfCheck::Passed { served_by } => println!("✔ 疎通確認OK ({})\n", served_by),
        SelfCheck::Inconclusive(message) => println!("⚠ 疎通確認に失敗しましたが続行します: {}\n", message),
        SelfCheck::Skipped => println!("⚠ 試行可能なキーがないため疎通確認を省略\n"),
    }

    // 3. 逐次解析
    println!("[3/4] 解析中...");
    pb.enable_steady_tick(Duration::from_millis(120));
    let mut cursor = AnalysisCursor::new(brief).with_events(service.dispatcher().events().clone());
    cursor.start(images);
    let mut status = cursor.run(&mut *service).await?;

    while status == CursorStatus::Paused {
        let progress = cursor.progress();
        let Some(error) = cursor.last_error() else {
            break;
        };
        pb.suspend(|| {
            eprintln!("\n✖ {}", error);
            if let Some(keys) = error.key_report().filter(|k| !k.is_empty()) {
                eprintln!("  キーの状態:");
                for key in keys {
                    eprintln!("    {}", key);
                }
            }
        });

        if error.is_config_error() {
            storyboard::save_storyboard(output, &cursor.to_storyboard())?;
            bail!("モデル名またはエンドポイントを確認してください（途中結果: {}）", output.display());
        }

        let retry = !no_retry
            && pb.suspend(|| {
                Confirm::new()
                    .with_prompt(format!(
                        "{}/{} の位置から再試行しますか？",
                        progress.current_index + 1,
                        progress.total
                    ))
                    .default(true)
                    .interact()
            })?;
        if !retry {
            storyboard::save_storyboard(output, &cursor.to_storyboard())?;
            bail!("解析を中断しました（途中結果: {}）", output.display());
        }

        status = cursor.resume(&mut *service).await?;
    }
    pb.finish_and_clear();
    println!("✔ 解析完了\n");

    // 4. 保存
    println!("[4/4] 保存中...");
    let board = cursor.to_storyboard();
    storyboard::save_storyboard(output, &board)?;
    Ok(board)
}

async fn edit_loop(
    service: &mut Service,
    board: &mut Storyboard,
    path: &Path,
    instruction: Option<String>,
) -> anyhow::Result<()> {
    let interactive = instruction.is_none();
    let mut next = instruction;

    loop {
        let instruction = match next.take() {
            Some(text) => text,
            None if interactive => Input::<String>::new()
                .with_prompt("修正指示（空行で終了）")
                .allow_empty(true)
                .interact_text()?,
            None => break,
        };
        if instruction.trim().is_empty() {
            break;
        }

        match service.edit_slides(board, &instruction).await {
            Ok(slides) => {
                board.slides = slides;
                storyboard::save_storyboard(path, board)?;
                print_slides(board);
            }
            Err(PhotoStoryError::EmptyStoryboard) => {
                eprintln!("⚠ 応答からスライドを読み取れませんでした。元のスライドを保持します");
            }
            Err(e) => return Err(e.into()),
        }

        if !interactive {
            break;
        }
    }
    Ok(())
}

async fn illustrate_missing(
    service: &mut Service,
    board: &mut Storyboard,
    output_dir: &Path,
) -> anyhow::Result<usize> {
    let targets = board.slides_needing_images();
    if targets.is_empty() {
        println!("画像が必要なスライドはありません");
        return Ok(0);
    }
    std::fs::create_dir_all(output_dir)?;

    let mut generated = 0;
    for index in targets {
        let slide = board.slides[index].clone();
        println!("- スライド{}: {}", index + 1, slide.title);
        match service.illustrate(&slide, &board.concept).await {
            Ok(image) => {
                let path = output_dir.join(&image.file_name);
                std::fs::write(&path, &image.data)?;
                println!("  ✔ {}", path.display());
                storyboard::attach_image(board, index, image)?;
                generated += 1;
            }
            Err(e) if e.is_config_error() || e.is_exhaustion() => return Err(e.into()),
            Err(e) => eprintln!("  ✖ {}", e),
        }
    }
    Ok(generated)
}

fn base_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn print_plan(plan: &NarrativePlan) {
    println!("タイトル: {}", plan.title);
    println!("核: {}", plan.logline);
    for (i, item) in plan.outline.iter().enumerate() {
        println!("  {}. {}", i + 1, item);
    }
    if !plan.photo_themes.is_empty() {
        println!("用意すると良い写真: {}", plan.photo_themes.join(" / "));
    }
}

fn print_slides(board: &Storyboard) {
    println!("\nスライド（{}枚）:", board.slides.len());
    for (i, slide) in board.slides.iter().enumerate() {
        let image = match &slide.image_id {
            Some(id) => format!("📷 {}", id),
            None if slide.needs_image => "画像なし".to_string(),
            None => String::new(),
        };
        println!("  {:>2}. {} {}", i + 1, slide.title, image);
    }
}
