//! Interactive shell over a FAT32 image.
//!
//! Thin adapter: tokenizes one line at a time, dispatches to the
//! [`Session`] command surface, and renders results. The engine never
//! prints; everything user-visible happens here.

use std::fs::OpenOptions;
use std::io::{self, BufRead, Write as _};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Arg, Command};

use fat32_shell::device::{ImageDevice, ImageFile};
use fat32_shell::fs::Volume;
use fat32_shell::session::Session;
use fat32_shell::FsError;

fn main() -> ExitCode {
    env_logger::init();

    let matches = Command::new("fat32-shell")
        .about("Mount a FAT32 image file and manipulate it interactively")
        .arg(
            Arg::new("image")
                .value_name("IMAGE")
                .required(true)
                .help("Path to the FAT32 image file"),
        )
        .get_matches();
    let image_name = matches
        .get_one::<String>("image")
        .expect("image is a required argument")
        .clone();

    let file = match OpenOptions::new().read(true).write(true).open(&image_name) {
        Ok(file) => file,
        Err(err) => {
            println!("Error: cannot open '{image_name}': {err}.");
            return ExitCode::FAILURE;
        }
    };
    let device: Arc<dyn ImageDevice> = Arc::new(ImageFile::new(file));
    let vol = match Volume::mount(device) {
        Ok(vol) => vol,
        Err(err) => {
            println!("Error: cannot mount '{image_name}': {err}.");
            return ExitCode::FAILURE;
        }
    };
    let mut session = Session::new(vol);

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("{}{}> ", image_name, session.path());
        io::stdout().flush().ok();

        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        // Split off the command, one argument, and the raw remainder, the
        // way `open NAME -rw` and `write NAME any text...` expect.
        let (command, rest) = split_token(input);
        let (argument, remainder) = split_token(rest);
        let argument = if argument.is_empty() {
            None
        } else {
            Some(argument)
        };
        let remainder = if remainder.is_empty() {
            None
        } else {
            Some(remainder)
        };

        match command {
            "exit" => {
                println!("Exiting...");
                break;
            }
            "info" => print_info(&session),
            "ls" => match session.ls() {
                Ok(names) => {
                    for name in names {
                        println!("{name}");
                    }
                }
                Err(err) => println!("ls: {err}."),
            },
            "cd" => match argument {
                None => println!("No directory specified."),
                Some(name) => match session.cd(name) {
                    Ok(()) => {}
                    Err(FsError::NotFound) => println!("Directory {name} does not exist."),
                    Err(FsError::NotADirectory) => println!("{name} is not a directory."),
                    Err(err) => println!("cd: {err}."),
                },
            },
            "mkdir" => match argument {
                None => println!("No directory name specified."),
                Some(name) => match session.mkdir(name) {
                    Ok(()) => println!("Directory {name} created successfully."),
                    Err(FsError::AlreadyExists) => {
                        println!("A file or directory named {name} already exists.")
                    }
                    Err(err) => println!("mkdir: {err}."),
                },
            },
            "creat" => match argument {
                None => println!("No file name specified."),
                Some(name) => match session.creat(name) {
                    Ok(()) => println!("File {name} created successfully."),
                    Err(FsError::AlreadyExists) => {
                        println!("A file or directory named {name} already exists.")
                    }
                    Err(err) => println!("creat: {err}."),
                },
            },
            "open" => match (argument, remainder) {
                (None, _) => println!("No file name specified."),
                (Some(_), None) => println!("No mode specified."),
                (Some(name), Some(mode)) => match session.open(name, mode) {
                    Ok(_) => println!("File '{name}' opened in mode '{mode}'."),
                    Err(FsError::BadMode) => println!("Invalid mode specified."),
                    Err(FsError::InUse) => println!("File '{name}' is already open."),
                    Err(FsError::NotFound) => println!("File '{name}' does not exist."),
                    Err(FsError::TooMany) => println!("Max open files limit reached."),
                    Err(err) => println!("open: {err}."),
                },
            },
            "close" => match argument {
                None => println!("No file name specified."),
                Some(name) => match session.close(name) {
                    Ok(()) => println!("File '{name}' closed successfully."),
                    Err(_) => {
                        println!("File '{name}' is not open or does not exist in the directory.")
                    }
                },
            },
            "lsof" => print_lsof(&session),
            "lseek" => match (argument, remainder) {
                (None, _) => println!("No file name specified."),
                (Some(_), None) => println!("No offset specified."),
                (Some(name), Some(offset)) => match parse_u32(offset) {
                    None => println!("Conversion error, non-numeric data found: {offset}"),
                    Some(offset) => match session.lseek(name, offset) {
                        Ok(()) => println!("Offset of file '{name}' set to {offset} bytes."),
                        Err(FsError::OffsetTooLarge) => println!(
                            "Offset {offset} is larger than the size of the file '{name}'."
                        ),
                        Err(_) => println!(
                            "File '{name}' is not open or does not exist in the directory."
                        ),
                    },
                },
            },
            "read" => match (argument, remainder) {
                (None, _) => println!("No file name specified."),
                (Some(_), None) => println!("No size specified."),
                (Some(name), Some(size)) => match parse_u32(size) {
                    None => println!("Conversion error, non-numeric data found: {size}"),
                    Some(size) => match session.read(name, size) {
                        Ok(bytes) => {
                            io::stdout().write_all(&bytes).ok();
                            println!();
                        }
                        Err(FsError::NotOpenForRead) => {
                            println!("File '{name}' is not opened for read.")
                        }
                        Err(FsError::NotOpen) => {
                            println!("File '{name}' is not found or not open for read.")
                        }
                        Err(err) => println!("read: {err}."),
                    },
                },
            },
            "write" => match (argument, remainder) {
                (None, _) => println!("No file name specified."),
                (Some(_), None) => println!("No string specified."),
                (Some(name), Some(data)) => match session.write(name, data.as_bytes()) {
                    Ok(_) => println!("{data} written to '{name}'."),
                    Err(FsError::NotOpenForWrite) => {
                        println!("File '{name}' is not opened for writing.")
                    }
                    Err(FsError::NotOpen) => println!("File '{name}' is not open."),
                    Err(FsError::NoSpace) => println!("Unable to extend file size."),
                    Err(err) => println!("write: {err}."),
                },
            },
            "rm" => match argument {
                None => println!("No file name specified."),
                Some("-r") => match remainder {
                    None => println!("No file name specified."),
                    Some(name) => match session.rm_tree(name) {
                        Ok(()) => println!("Directory '{name}' removed successfully."),
                        Err(FsError::NotFound) => println!("Directory '{name}' does not exist."),
                        Err(FsError::NotADirectory) => println!("'{name}' is not a directory."),
                        Err(FsError::InUse) => {
                            println!("Directory '{name}' contains an open file.")
                        }
                        Err(err) => println!("rm -r: {err}."),
                    },
                },
                Some(name) => match session.rm(name) {
                    Ok(()) => println!("File '{name}' successfully deleted."),
                    Err(FsError::NotFound) => println!("File '{name}' does not exist."),
                    Err(FsError::NotAFile) => println!("'{name}' is a directory, not a file."),
                    Err(FsError::InUse) => {
                        println!("File '{name}' is currently open and cannot be deleted.")
                    }
                    Err(err) => println!("rm: {err}."),
                },
            },
            "rmdir" => match argument {
                None => println!("No directory name specified."),
                Some(name) => match session.rmdir(name) {
                    Ok(()) => println!("Directory '{name}' successfully removed."),
                    Err(FsError::NotFound) => println!("Directory '{name}' does not exist."),
                    Err(FsError::NotADirectory) => println!("'{name}' is not a directory."),
                    Err(FsError::NotEmpty) => println!("Directory '{name}' is not empty."),
                    Err(err) => println!("rmdir: {err}."),
                },
            },
            _ => println!("Unknown command."),
        }
    }

    ExitCode::SUCCESS
}

/// First whitespace-delimited token and the trimmed remainder.
fn split_token(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(pos) => (&input[..pos], input[pos..].trim_start()),
        None => (input, ""),
    }
}

fn parse_u32(input: &str) -> Option<u32> {
    input.parse::<u32>().ok()
}

fn print_info(session: &Session) {
    let info = session.info();
    println!("Bytes Per Sector: {}", info.bytes_per_sector);
    println!("Sectors Per Cluster: {}", info.sectors_per_cluster);
    println!("Root Cluster: {}", info.root_cluster);
    println!("Total # of Clusters in Data Region: {}", info.data_clusters);
    println!("# of Entries in One FAT: {}", info.fat_entries);
    println!("Size of Image (in bytes): {}", info.image_bytes);
}

fn print_lsof(session: &Session) {
    let handles = session.lsof();
    if handles.is_empty() {
        println!("No files are currently opened.");
        return;
    }
    println!(
        "{:<10} {:<12} {:<10} {:<10} {}",
        "Index", "Filename", "Mode", "Offset", "Path"
    );
    for handle in handles {
        println!(
            "{:<10} {:<12} {:<10} {:<10} {}",
            handle.index, handle.name, handle.mode, handle.offset, handle.path
        );
    }
}
