use clap::Parser;
use inodefs::{cli_interface::InodeFsCli, volume::Volume};
/// a CLI interface to create a superblock, add directories and files to the tree
/// it stores, or print that tree.
///
/// Every editing subcommand loads the whole superblock, applies one change
/// and writes it back.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let args = InodeFsCli::parse();
    match args {
        InodeFsCli::Mkfs(args) => {
            inodefs::mkfs::mkfs(args.superblock_path)?;
        }
        InodeFsCli::Mkdir(args) => {
            let device = args.device;
            let mut volume =
                Volume::open(device.superblock_path, device.block_size, device.block_count)?;
            let id = volume.mkdir(&args.path)?;
            volume.save()?;
            println!("created directory {} (id {id})", args.path);
        }
        InodeFsCli::Touch(args) => {
            let device = args.device;
            let mut volume =
                Volume::open(device.superblock_path, device.block_size, device.block_count)?;
            let id = volume.create_file(&args.path, args.readonly, args.size)?;
            volume.save()?;
            println!("created file {} (id {id})", args.path);
        }
        InodeFsCli::Dump(args) => {
            let device = args.device;
            let volume =
                Volume::open(device.superblock_path, device.block_size, device.block_count)?;
            print!("{}", volume.dump());
        }
    }
    Ok(())
}
