fn main() {
    lode::main()
}
