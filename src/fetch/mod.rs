pub mod http;
pub mod pipeline;

pub use http::{Downloaded, HttpClient};
pub use pipeline::{
    download_all, only_missing, save_files, DownloadedData, FileGetter, FileSaveResults,
    SourceFileGetter,
};
