use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "photo-story")]
#[command(about = "写真から物語スライドを組み立てるAIストーリーボードツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// コンセプトから構成案を作成
    Plan {
        /// 物語のコンセプト
        #[arg(required = true)]
        concept: String,

        /// 出力JSONファイル（省略時は標準出力）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 写真フォルダを1枚ずつ解析してストーリーボードを作成
    Run {
        /// 写真フォルダのパス
        #[arg(required = true)]
        folder: PathBuf,

        /// 物語のコンセプト
        #[arg(short, long)]
        concept: String,

        /// 構成案JSON（`plan` の出力）
        #[arg(short, long)]
        plan: Option<PathBuf>,

        /// 出力JSONファイル（デフォルト: 入力フォルダ/storyboard.json）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 失敗時に確認せず中断する
        #[arg(long)]
        no_retry: bool,
    },

    /// チャット指示でスライドを修正
    Edit {
        /// ストーリーボードJSON
        #[arg(required = true)]
        input: PathBuf,

        /// 修正指示（省略時は対話入力）
        #[arg(short, long)]
        instruction: Option<String>,
    },

    /// 写真が足りないスライドの画像を生成
    Illustrate {
        /// ストーリーボードJSON
        #[arg(required = true)]
        input: PathBuf,

        /// 生成画像の保存先（デフォルト: ストーリーボードと同じフォルダ）
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// スライドの短い動画を生成
    Animate {
        /// ストーリーボードJSON
        #[arg(required = true)]
        input: PathBuf,

        /// スライド番号（1始まり）
        #[arg(short, long)]
        slide: usize,

        /// 動画の保存先ファイル
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// APIキーの状態確認・リセット
    Keys {
        /// 全キーに疎通確認を送る
        #[arg(long)]
        check: bool,

        /// 保存済みのクールダウンを消す
        #[arg(long)]
        reset: bool,
    },

    /// 設定
    Config {
        /// APIキーを追加
        #[arg(long)]
        add_key: Option<String>,

        /// APIキーを削除（キー本体または末尾4文字）
        #[arg(long)]
        remove_key: Option<String>,

        /// APIキーを固定（キー本体または末尾4文字）
        #[arg(long)]
        pin: Option<String>,

        /// 固定を解除
        #[arg(long)]
        unpin: bool,

        /// テキストモデルを変更
        #[arg(long)]
        model: Option<String>,

        /// 現在の設定を表示
        #[arg(long)]
        show: bool,
    },
}
