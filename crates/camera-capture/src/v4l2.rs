//! Live capture from a V4L2 device (`/dev/videoN`)
//!
//! Memory-mapped streaming I/O. The driver is asked for YUYV at the
//! configured resolution; MJPEG is accepted when the driver insists on it.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr;
use std::slice;

use image::{imageops, ImageFormat};
use tracing::{debug, info, warn};

use crate::source::now_ns;
use crate::{CameraConfig, CameraError, FrameSource, VideoFrame};

const BUFFER_COUNT: u32 = 4;

/// Longest wait for one frame before the read is reported as failed
const READ_TIMEOUT_MS: i32 = 2000;

const BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const MEMORY_MMAP: u32 = 1;
const FIELD_NONE: u32 = 1;

const CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
const CAP_STREAMING: u32 = 0x0400_0000;
const CAP_DEVICE_CAPS: u32 = 0x8000_0000;

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

pub const PIX_FMT_YUYV: u32 = fourcc(b"YUYV");
pub const PIX_FMT_MJPEG: u32 = fourcc(b"MJPG");

fn fourcc_name(code: u32) -> String {
    code.to_le_bytes().iter().map(|b| *b as char).collect()
}

// Kernel ABI structures (linux/videodev2.h)

#[allow(dead_code)]
#[repr(C)]
struct Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct PixFormat {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    priv_: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

#[allow(dead_code)]
#[repr(C)]
union FormatUnion {
    pix: PixFormat,
    raw: [u8; 200],
    // the kernel union holds pointers
    _align: [u64; 25],
}

#[repr(C)]
struct Format {
    type_: u32,
    fmt: FormatUnion,
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct Fract {
    numerator: u32,
    denominator: u32,
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct CaptureParm {
    capability: u32,
    capturemode: u32,
    timeperframe: Fract,
    extendedmode: u32,
    readbuffers: u32,
    reserved: [u32; 4],
}

#[allow(dead_code)]
#[repr(C)]
union StreamParmUnion {
    capture: CaptureParm,
    raw: [u8; 200],
}

#[repr(C)]
struct StreamParm {
    type_: u32,
    parm: StreamParmUnion,
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Default)]
struct RequestBuffers {
    count: u32,
    type_: u32,
    memory: u32,
    capabilities: u32,
    flags: u8,
    reserved: [u8; 3],
}

#[allow(dead_code)]
#[repr(C)]
struct Timecode {
    type_: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy)]
union BufferM {
    offset: u32,
    userptr: libc::c_ulong,
    planes: *mut libc::c_void,
    fd: i32,
}

#[allow(dead_code)]
#[repr(C)]
struct Buffer {
    index: u32,
    type_: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: libc::timeval,
    timecode: Timecode,
    sequence: u32,
    memory: u32,
    m: BufferM,
    length: u32,
    reserved2: u32,
    request_fd: i32,
}

impl Buffer {
    fn mmap(index: u32) -> Self {
        // SAFETY: plain-old-data kernel struct; all-zero is a valid value
        let mut buf: Buffer = unsafe { mem::zeroed() };
        buf.index = index;
        buf.type_ = BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = MEMORY_MMAP;
        buf
    }
}

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, nr: u32, size: usize) -> libc::c_ulong {
    ((dir << 30) | ((size as u32) << 16) | ((b'V' as u32) << 8) | nr) as libc::c_ulong
}

const VIDIOC_QUERYCAP: libc::c_ulong = ioc(IOC_READ, 0, mem::size_of::<Capability>());
const VIDIOC_S_FMT: libc::c_ulong = ioc(IOC_READ | IOC_WRITE, 5, mem::size_of::<Format>());
const VIDIOC_REQBUFS: libc::c_ulong = ioc(IOC_READ | IOC_WRITE, 8, mem::size_of::<RequestBuffers>());
const VIDIOC_QUERYBUF: libc::c_ulong = ioc(IOC_READ | IOC_WRITE, 9, mem::size_of::<Buffer>());
const VIDIOC_QBUF: libc::c_ulong = ioc(IOC_READ | IOC_WRITE, 15, mem::size_of::<Buffer>());
const VIDIOC_DQBUF: libc::c_ulong = ioc(IOC_READ | IOC_WRITE, 17, mem::size_of::<Buffer>());
const VIDIOC_STREAMON: libc::c_ulong = ioc(IOC_WRITE, 18, mem::size_of::<libc::c_int>());
const VIDIOC_STREAMOFF: libc::c_ulong = ioc(IOC_WRITE, 19, mem::size_of::<libc::c_int>());
const VIDIOC_S_PARM: libc::c_ulong = ioc(IOC_READ | IOC_WRITE, 22, mem::size_of::<StreamParm>());

fn xioctl<T>(fd: RawFd, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    loop {
        // SAFETY: `arg` is the structure the request number was built for
        let ret = unsafe { libc::ioctl(fd, request as _, arg as *mut T) };
        if ret != -1 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// One driver buffer mapped into our address space
struct Mapping {
    ptr: *mut libc::c_void,
    len: usize,
}

// The mapping is owned by one camera and only read by the thread holding it.
unsafe impl Send for Mapping {}

impl Mapping {
    fn bytes(&self, used: usize) -> &[u8] {
        // SAFETY: `ptr` is a live mapping of `len` bytes until drop
        unsafe { slice::from_raw_parts(self.ptr as *const u8, used.min(self.len)) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly what mmap returned
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}

/// Streaming V4L2 capture device
pub struct V4l2Camera {
    device: PathBuf,
    buffers: Vec<Mapping>,
    file: File,
    width: u32,
    height: u32,
    pixelformat: u32,
    bytesperline: u32,
    streaming: bool,
}

impl V4l2Camera {
    /// Open `/dev/video{index}` at the configured resolution
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let device = PathBuf::from(format!("/dev/video{}", config.index));
        Self::open_device(&device, config.width, config.height, config.fps)
    }

    pub fn open_device(device: &Path, width: u32, height: u32, fps: u32) -> Result<Self, CameraError> {
        let open_err = |what: &str, e: io::Error| CameraError::Open(format!("{}: {what}: {e}", device.display()));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(device)
            .map_err(|e| open_err("open", e))?;
        let fd = file.as_raw_fd();

        // SAFETY: plain-old-data kernel struct
        let mut cap: Capability = unsafe { mem::zeroed() };
        xioctl(fd, VIDIOC_QUERYCAP, &mut cap).map_err(|e| open_err("query capabilities", e))?;
        let caps = if cap.capabilities & CAP_DEVICE_CAPS != 0 {
            cap.device_caps
        } else {
            cap.capabilities
        };
        if caps & CAP_VIDEO_CAPTURE == 0 {
            return Err(CameraError::Open(format!("{}: not a video capture device", device.display())));
        }
        if caps & CAP_STREAMING == 0 {
            return Err(CameraError::Open(format!("{}: streaming I/O not supported", device.display())));
        }

        // SAFETY: plain-old-data kernel struct
        let mut format: Format = unsafe { mem::zeroed() };
        format.type_ = BUF_TYPE_VIDEO_CAPTURE;
        format.fmt.pix = PixFormat {
            width,
            height,
            pixelformat: PIX_FMT_YUYV,
            field: FIELD_NONE,
            ..PixFormat::default()
        };
        xioctl(fd, VIDIOC_S_FMT, &mut format).map_err(|e| open_err("set format", e))?;
        // SAFETY: the driver fills the `pix` member for capture buffers
        let pix = unsafe { format.fmt.pix };
        if pix.pixelformat != PIX_FMT_YUYV && pix.pixelformat != PIX_FMT_MJPEG {
            return Err(CameraError::Open(format!(
                "{}: unsupported pixel format {}",
                device.display(),
                fourcc_name(pix.pixelformat)
            )));
        }
        if (pix.width, pix.height) != (width, height) {
            warn!(
                device = %device.display(),
                requested = ?(width, height),
                granted = ?(pix.width, pix.height),
                "driver adjusted capture resolution"
            );
        }

        if fps > 0 {
            set_frame_rate(fd, fps, device);
        }

        let mut request = RequestBuffers {
            count: BUFFER_COUNT,
            type_: BUF_TYPE_VIDEO_CAPTURE,
            memory: MEMORY_MMAP,
            ..RequestBuffers::default()
        };
        xioctl(fd, VIDIOC_REQBUFS, &mut request).map_err(|e| open_err("request buffers", e))?;
        if request.count < 2 {
            return Err(CameraError::Open(format!("{}: insufficient buffer memory", device.display())));
        }

        let mut buffers = Vec::with_capacity(request.count as usize);
        for index in 0..request.count {
            let mut buf = Buffer::mmap(index);
            xioctl(fd, VIDIOC_QUERYBUF, &mut buf).map_err(|e| open_err("query buffer", e))?;
            let len = buf.length as usize;
            // SAFETY: the driver filled `offset` for an MMAP buffer
            let offset = unsafe { buf.m.offset };
            // SAFETY: mapping a driver buffer at the offset it reported
            let ptr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    offset as libc::off_t,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(open_err("mmap", io::Error::last_os_error()));
            }
            buffers.push(Mapping { ptr, len });
        }

        let mut camera = Self {
            device: device.to_path_buf(),
            buffers,
            file,
            width: pix.width,
            height: pix.height,
            pixelformat: pix.pixelformat,
            bytesperline: pix.bytesperline,
            streaming: false,
        };
        for index in 0..camera.buffers.len() as u32 {
            camera.queue(index).map_err(|e| open_err("queue buffer", e))?;
        }
        let mut kind = BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        xioctl(fd, VIDIOC_STREAMON, &mut kind).map_err(|e| open_err("stream on", e))?;
        camera.streaming = true;

        info!(
            device = %device.display(),
            width = camera.width,
            height = camera.height,
            format = %fourcc_name(camera.pixelformat),
            buffers = camera.buffers.len(),
            "camera streaming"
        );
        Ok(camera)
    }

    fn queue(&self, index: u32) -> io::Result<()> {
        let mut buf = Buffer::mmap(index);
        xioctl(self.file.as_raw_fd(), VIDIOC_QBUF, &mut buf)
    }

    fn wait_readable(&self) -> Result<(), CameraError> {
        let mut fds = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one valid pollfd
        let ready = unsafe { libc::poll(&mut fds, 1, READ_TIMEOUT_MS) };
        match ready {
            n if n < 0 => Err(CameraError::Read(format!("poll: {}", io::Error::last_os_error()))),
            0 => Err(CameraError::Read(format!("no frame within {READ_TIMEOUT_MS} ms"))),
            _ => Ok(()),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<VideoFrame, CameraError> {
        match self.pixelformat {
            PIX_FMT_YUYV => {
                let rgb = yuyv_to_rgb(bytes, self.width, self.height, self.bytesperline)?;
                Ok(VideoFrame::new(rgb, self.width, self.height, now_ns(), 0))
            }
            _ => {
                let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
                    .map_err(|e| CameraError::Decode(format!("mjpeg: {e}")))?
                    .to_rgb8();
                let img = if img.dimensions() != (self.width, self.height) {
                    imageops::resize(&img, self.width, self.height, imageops::FilterType::Triangle)
                } else {
                    img
                };
                Ok(VideoFrame::from_rgb_image(img, now_ns(), 0))
            }
        }
    }
}

impl FrameSource for V4l2Camera {
    fn read(&mut self) -> Result<VideoFrame, CameraError> {
        self.wait_readable()?;

        let mut buf = Buffer::mmap(0);
        if let Err(e) = xioctl(self.file.as_raw_fd(), VIDIOC_DQBUF, &mut buf) {
            if e.raw_os_error() == Some(libc::ENODEV) {
                return Err(CameraError::Open(format!("{}: device removed", self.device.display())));
            }
            return Err(CameraError::Read(format!("dequeue: {e}")));
        }

        let decoded = match self.buffers.get(buf.index as usize) {
            Some(mapping) => self.decode(mapping.bytes(buf.bytesused as usize)),
            None => return Err(CameraError::Read(format!("driver returned unknown buffer {}", buf.index))),
        };
        // hand the buffer back before reporting a decode failure
        self.queue(buf.index)
            .map_err(|e| CameraError::Read(format!("requeue: {e}")))?;
        decoded
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        if self.streaming {
            let mut kind = BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
            if let Err(e) = xioctl(self.file.as_raw_fd(), VIDIOC_STREAMOFF, &mut kind) {
                warn!(device = %self.device.display(), error = %e, "stream off failed");
            }
        }
        debug!(device = %self.device.display(), "camera closed");
    }
}

fn set_frame_rate(fd: RawFd, fps: u32, device: &Path) {
    // SAFETY: plain-old-data kernel struct
    let mut parm: StreamParm = unsafe { mem::zeroed() };
    parm.type_ = BUF_TYPE_VIDEO_CAPTURE;
    parm.parm.capture = CaptureParm {
        timeperframe: Fract {
            numerator: 1,
            denominator: fps,
        },
        ..CaptureParm::default()
    };
    if let Err(e) = xioctl(fd, VIDIOC_S_PARM, &mut parm) {
        warn!(device = %device.display(), fps, error = %e, "frame interval not accepted, pacing in software");
    }
}

/// Convert packed YUYV (4:2:2) to RGB24 with BT.601 studio-range coefficients.
///
/// `stride` is the driver's bytes per line; rows may be padded.
pub fn yuyv_to_rgb(src: &[u8], width: u32, height: u32, stride: u32) -> Result<Vec<u8>, CameraError> {
    let (w, h) = (width as usize, height as usize);
    let stride = (stride as usize).max(w * 2);
    if w == 0 || h == 0 || w % 2 != 0 {
        return Err(CameraError::Decode(format!("invalid YUYV geometry {w}x{h}")));
    }
    let needed = stride * (h - 1) + w * 2;
    if src.len() < needed {
        return Err(CameraError::Decode(format!(
            "short YUYV frame: {} bytes for {w}x{h}",
            src.len()
        )));
    }

    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let start = row * stride;
        for pair in src[start..start + w * 2].chunks_exact(4) {
            let (y0, u, y1, v) = (pair[0], pair[1], pair[2], pair[3]);
            rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
            rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
        }
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}
